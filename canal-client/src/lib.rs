pub mod client;
pub mod error;
pub mod frame;
pub mod protocol;

pub use client::{Batch, CanalClient, ClientOptions, Subscription, EMPTY_BATCH_ID};
pub use error::CanalError;
