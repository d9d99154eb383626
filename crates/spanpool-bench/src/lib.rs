//! Benchmark-only member; see `benches/throughput.rs`.
