pub mod models;

pub use models::events::{LifecycleEvent, LifecycleEventKind};
