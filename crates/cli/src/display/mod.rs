pub mod call_breakdown;
pub mod samples;

pub use call_breakdown::print_prepared_call;
pub use samples::{format_sample, print_samples};
