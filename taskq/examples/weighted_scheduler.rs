//! Weighted scheduling example
//!
//! Fills two queues and serves them through a 3:1 weighted scheduler over
//! the in-memory store, then prints how many tasks each queue served and the
//! collected metrics.
//!
//! Run with `RUST_LOG=taskq=debug cargo run --example weighted_scheduler`.

use std::sync::Arc;
use taskq::{EngineMetrics, MemoryStore, PriorityScheduler, Queue, SchedulerMode, Slot, Store, Task, TaskQueue};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let metrics = EngineMetrics::new()?;

    let fast = Arc::new(Queue::new("fast", store.clone())?.with_metrics(metrics.clone()));
    let slow = Arc::new(Queue::new("slow", store.clone())?.with_metrics(metrics.clone()));

    for i in 0..40 {
        fast.enqueue(Task::builder("report").payload_value("n", i).build()?).await?;
        slow.enqueue(Task::builder("export").payload_value("n", i).build()?).await?;
    }

    let mut scheduler = PriorityScheduler::new("workers", SchedulerMode::Weighted, store)?
        .with_metrics(metrics.clone());
    scheduler.add_queue(fast.clone(), Slot::Weight(3)).await?;
    scheduler.add_queue(slow.clone(), Slot::Weight(1)).await?;

    let mut served = (0u32, 0u32);
    for _ in 0..40 {
        match scheduler.get_task().await? {
            Some(task) if task.task_type == "report" => served.0 += 1,
            Some(_) => served.1 += 1,
            None => break,
        }
    }

    println!("fast served {}, slow served {}", served.0, served.1);
    println!("left: fast {}, slow {}", fast.len().await?, slow.len().await?);
    println!("{}", metrics.gather_text());
    Ok(())
}
