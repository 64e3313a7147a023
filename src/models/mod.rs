// Snapshot models handed to collaborators

mod cpu;
mod gpu;
mod process;
mod ram;
mod snapshot;

pub use cpu::CpuSnapshot;
pub use gpu::GpuSnapshot;
pub use process::{ProcessRanking, ProcessRecord};
pub use ram::RamSnapshot;
pub use snapshot::SystemSnapshot;

/// Clamp a percentage into `[0, 100]`; NaN becomes 0.
pub fn clamp_percent(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 100.0)
    }
}
