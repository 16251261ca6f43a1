//! The three streaming stages: window aggregation, span assembly, and bin
//! aggregation. Each runs as its own task, connected by bounded channels.

pub mod assembler;
pub mod binner;
pub mod window;

pub use assembler::SpanAssembler;
pub use binner::BinAggregator;
pub use window::WindowAggregator;
