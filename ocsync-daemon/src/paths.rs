use std::path::{Path, PathBuf};

pub use ocsync_core::store::ocsync_root;

pub const DAEMON_SOCKET: &str = "daemon.sock";

pub fn socket_path(home: &Path) -> PathBuf {
    ocsync_root(home).join(DAEMON_SOCKET)
}
