pub mod usage_event;

pub use usage_event::UsageEvent;
