// Kernel/driver counter locations (Linux and Android).

pub const PROC_STAT: &str = "/proc/stat";
pub const PROC_LOADAVG: &str = "/proc/loadavg";
pub const PROC_MEMINFO: &str = "/proc/meminfo";

pub const CPU0_CUR_FREQ_KHZ: &str = "/sys/devices/system/cpu/cpu0/cpufreq/scaling_cur_freq";

pub const CPU_THERMAL_PATHS: &[&str] = &[
    "/sys/class/thermal/thermal_zone0/temp",
    "/sys/devices/virtual/thermal/thermal_zone0/temp",
    "/sys/class/hwmon/hwmon0/temp1_input",
    "/sys/devices/platform/coretemp.0/hwmon/hwmon0/temp1_input",
];

/// Qualcomm Adreno (kgsl).
pub const ADRENO_LOAD_PATHS: &[&str] = &[
    "/sys/class/kgsl/kgsl-3d0/gpu_busy_percentage",
    "/sys/class/kgsl/kgsl-3d0/gpubusy",
    "/sys/kernel/gpu/gpu_busy",
];

/// ARM Mali.
pub const MALI_LOAD_PATHS: &[&str] = &[
    "/sys/class/misc/mali0/device/utilization",
    "/sys/devices/platform/mali.0/utilization",
    "/sys/module/mali/parameters/mali_gpu_utilization",
    "/sys/devices/platform/ffaf0000.gpu/utilization",
    "/sys/devices/platform/13000000.mali/utilization",
];

pub const GENERIC_GPU_LOAD_PATHS: &[&str] = &[
    "/sys/kernel/gpu/gpu_busy",
    "/sys/devices/platform/gpu/utilization",
];

/// "used total" byte pairs.
pub const GPU_MEMORY_PATHS: &[&str] = &[
    "/sys/class/kgsl/kgsl-3d0/gpu_memory_usage",
    "/sys/kernel/gpu/gpu_memory",
];

pub const GPU_THERMAL_PATHS: &[&str] = &[
    "/sys/class/thermal/thermal_zone1/temp",
    "/sys/class/thermal/thermal_zone2/temp",
    "/sys/class/kgsl/kgsl-3d0/temp",
];

pub fn proc_pid_stat(pid: u32) -> String {
    format!("/proc/{}/stat", pid)
}

pub fn proc_pid_smaps_rollup(pid: u32) -> String {
    format!("/proc/{}/smaps_rollup", pid)
}

pub fn proc_pid_cmdline(pid: u32) -> String {
    format!("/proc/{}/cmdline", pid)
}

/// Thermal sysfs nodes report millidegrees; anything above 1000 is scaled down.
pub fn normalize_temperature(raw: f32) -> f32 {
    if raw > 1000.0 { raw / 1000.0 } else { raw }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn millidegrees_are_scaled() {
        assert_eq!(normalize_temperature(45_500.0), 45.5);
        assert_eq!(normalize_temperature(45.5), 45.5);
        assert_eq!(normalize_temperature(1000.0), 1000.0);
    }

    #[test]
    fn pid_paths() {
        assert_eq!(proc_pid_stat(42), "/proc/42/stat");
        assert_eq!(proc_pid_smaps_rollup(7), "/proc/7/smaps_rollup");
    }
}
