pub mod adapter;
pub mod channel;

pub use adapter::EngineAdapter;
pub use channel::LineChannel;
