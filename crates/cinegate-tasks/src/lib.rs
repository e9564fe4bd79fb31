//! # Cinegate Tasks
//!
//! Background work that outlives the request that started it, with a bounded
//! wait at shutdown.
//!
//! Handlers hand post-response work (sending a welcome email, for example) to
//! [`BackgroundTasks::spawn`]. Each task is counted in flight from the moment
//! it is accepted until it finishes, fails, or panics. At shutdown the server
//! calls [`BackgroundTasks::close`] and then
//! [`BackgroundTasks::await_drain`], which resolves once the count reaches
//! zero or the timeout elapses:
//!
//! ```rust,no_run
//! use cinegate_tasks::{BackgroundTasks, DrainOutcome};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let tasks = BackgroundTasks::new();
//!
//!     tasks
//!         .spawn("send-email", async {
//!             tokio::time::sleep(Duration::from_millis(50)).await;
//!             Ok::<_, std::io::Error>(())
//!         })
//!         .unwrap();
//!
//!     match tasks.shutdown(Duration::from_secs(30)).await {
//!         DrainOutcome::Drained => println!("clean exit"),
//!         DrainOutcome::TimedOut { remaining } => println!("{remaining} tasks abandoned"),
//!     }
//! }
//! ```

#![doc(html_root_url = "https://docs.rs/cinegate-tasks/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod error;
mod manager;
mod task;

pub use error::{TaskError, TaskResult};
pub use manager::{BackgroundTasks, DrainOutcome};
pub use task::{TaskId, TaskStats};
