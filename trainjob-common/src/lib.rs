pub mod shutdown;

/// Writes the readiness file consulted by the container's liveness/readiness
/// probe once the controller has finished wiring up its caches.
pub fn signal_ready() {
    std::fs::write("/etc/ready", "ready").expect("Failed to write readiness file");
}

pub fn init() {
    let disable_colors = ["1", "true"].contains(
        &std::env::var("DISABLE_COLORS")
            .unwrap_or_else(|_| String::new())
            .to_lowercase()
            .as_str(),
    );
    owo_colors::set_override(!disable_colors);
}

/// Label and annotation keys the controller writes onto resources it owns.
pub mod annotations {
    pub const SPEC_HASH: &str = "trainjob.example.io/spec-hash";
    pub const CREATED_BY: &str = "trainjob.example.io/created-by";
}

pub mod labels {
    pub const JOB_NAME: &str = "trainjob.example.io/job-name";
    pub const GROUP_NAME: &str = "trainjob.example.io/group-name";
    pub const REPLICA_TYPE: &str = "trainjob.example.io/replica-type";
    pub const REPLICA_INDEX: &str = "trainjob.example.io/replica-index";
    pub const JOB_ROLE: &str = "trainjob.example.io/job-role";
    pub const JOB_ROLE_MASTER: &str = "master";
}
