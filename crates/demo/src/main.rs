//! Order-ingestion consumer over the in-memory bus.
//!
//! Publishes a handful of orders (some malformed, one that the writer always
//! refuses), lets the batching consumer work through them, then prints the
//! counters and the dead-letter queue.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Context;
use serde::Deserialize;

use batchline_core::{BatchConfig, ConsumerError, ConsumerResult, Message};
use batchline_runtime::{
    BatchScheduler, ConsumerWorker, DecodedBatchHandler, JsonDecoder, RetryPolicy, Retrying,
};
use batchline_transport::{DeadLetterQueue, Delivery, InMemoryBus, MessageBus, Republish};

#[derive(Debug, Deserialize)]
struct Order {
    sku: String,
    qty: u32,
}

/// Stand-in for a table insert: rows for discontinued SKUs are refused.
fn write_orders(orders: &[&Order]) -> ConsumerResult<Vec<usize>> {
    let mut refused = Vec::new();
    for (i, order) in orders.iter().enumerate() {
        if order.sku.starts_with("DISC-") {
            refused.push(i);
        } else {
            tracing::info!(sku = %order.sku, qty = order.qty, "order stored");
        }
    }
    Ok(refused)
}

fn main() -> anyhow::Result<()> {
    batchline_observability::init();

    let config = BatchConfig::from_env().context("invalid batch configuration")?;
    tracing::info!(?config, "starting order consumer");

    let bus: Arc<InMemoryBus<Delivery>> = Arc::new(InMemoryBus::new());
    let dlq = Arc::new(DeadLetterQueue::new(DeadLetterQueue::DEFAULT_CAPACITY));

    let scheduler = BatchScheduler::<Order>::builder(config.clone())
        .name("orders")
        .handler(DecodedBatchHandler::new(write_orders))
        .retry_transport(Retrying::new(
            Republish::new(bus.clone()),
            &RetryPolicy::default(),
        ))
        .dead_letter_shared(dlq.clone())
        .decoder(JsonDecoder::<Order>::new())
        .validator(|message: &mut Message<Order>| match message.value() {
            Some(order) if order.qty == 0 => Err(ConsumerError::validation("qty must be positive")),
            _ => Ok(()),
        })
        .reject_handler(|message: Message<Order>, err: &ConsumerError| {
            tracing::warn!(
                payload = %String::from_utf8_lossy(&message.data),
                error = %err,
                "order rejected"
            );
        })
        .build()
        .context("failed to build scheduler")?;

    let consumer = ConsumerWorker::spawn("orders-consumer", &bus, scheduler.clone())?;
    let timer = scheduler.start()?;

    let samples = [
        r#"{"sku":"A-100","qty":2}"#,
        r#"{"sku":"B-200","qty":1}"#,
        r#"{"sku":"DISC-9","qty":5}"#,
        r#"{"sku":"C-300","qty":0}"#,
        r#"{"sku":"D-400""#,
        r#"{"sku":"E-500","qty":7}"#,
    ];
    for sample in samples {
        bus.publish(Delivery::bare(sample).with_generated_id())
            .map_err(|e| anyhow::anyhow!("publish failed: {e}"))?;
    }

    // Each retry cycle needs at most one timer tick to flush.
    let deadline = Instant::now() + config.timeout() * (config.limit_retry + 3);
    while dlq.is_empty() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(50));
    }

    consumer.shutdown();
    timer.shutdown();

    println!("{}", serde_json::to_string_pretty(&scheduler.stats())?);
    for entry in dlq.entries() {
        println!(
            "dead-lettered at {}: {} {:?}",
            entry.dead_lettered_at,
            String::from_utf8_lossy(&entry.data),
            entry.attributes
        );
    }

    Ok(())
}
