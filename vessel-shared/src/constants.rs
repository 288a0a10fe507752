//! Constants shared between the runtime core and the CLI.

/// On-disk state layout names under the data directory.
pub mod dirs {
    /// Default data directory name under the user's home.
    pub const VESSEL_DIR: &str = ".vessel";

    /// Per-container record directories.
    pub const CONTAINERS: &str = "containers";

    /// Per-sandbox record directories.
    pub const SANDBOXES: &str = "sandboxes";

    /// Content-addressed image store.
    pub const IMAGES: &str = "images";

    /// Materialized container trees for the simulating VFS backends.
    pub const TREES: &str = "trees";

    /// Extracted image root filesystem directory name.
    pub const ROOTFS: &str = "rootfs";
}

/// Record document file names inside a record directory.
pub mod filenames {
    /// Immutable creation-time specification document.
    pub const SPEC: &str = "spec";

    /// Mutable status document, replaced atomically on every transition.
    pub const STATUS: &str = "status";

    /// Image record document.
    pub const RECORD: &str = "record.json";

    /// Captured stdout/stderr of the container entrypoint.
    pub const LOG: &str = "log";

    /// Runtime single-instance lock file.
    pub const LOCK: &str = ".lock";
}

/// Environment variables recognized by the runtime and CLI.
pub mod envs {
    /// Overrides the default data directory.
    pub const VESSEL_DATA_DIR: &str = "VESSEL_DATA_DIR";

    /// Overrides the log filter (same syntax as `RUST_LOG`).
    pub const VESSEL_LOG: &str = "VESSEL_LOG";
}

/// Default configuration values.
pub mod defaults {
    /// CRI endpoint port on localhost.
    pub const CRI_PORT: u16 = 10350;

    /// Default bridge sandboxes attach to.
    pub const BRIDGE_NAME: &str = "vessel0";

    /// Graceful stop signal (SIGTERM).
    pub const STOP_SIGNAL: i32 = 15;

    /// Seconds a registered exec/attach/port-forward session stays valid.
    pub const STREAM_SESSION_TTL_SECS: u64 = 60;

    /// Rootful user-namespace map: container uid 1000 maps over this range.
    pub const IDMAP_RANGE: u32 = 65_536;

    /// CRI API version string reported by `version()`.
    pub const CRI_API_VERSION: &str = "v1";
}
