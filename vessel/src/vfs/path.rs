//! Container path confinement.
//!
//! Every VFS operation resolves its container path through [`confine`],
//! which pins the result inside the container root: `..` components may not
//! pop past the root, and symlinks are followed only while their targets
//! stay inside the root (absolute link targets re-root at the container
//! root, the way the kernel resolves them after pivot_root).

use std::path::{Component, Path, PathBuf};

use vessel_shared::{VesselError, VesselResult};

/// Upper bound on symlink traversals during one resolution.
const MAX_SYMLINK_HOPS: usize = 40;

/// Resolve `container_path` against `root`, confining the result.
///
/// The returned host path is crate-internal; it never crosses the VFS API
/// boundary. The final component does not have to exist (callers like
/// `write` and `mkdir` create it), but every intermediate symlink is
/// resolved and checked.
///
/// # Errors
///
/// `InvalidArg` for relative paths, `..` escapes, and symlink chains that
/// leave the root or exceed [`MAX_SYMLINK_HOPS`].
pub fn confine(root: &Path, container_path: &str) -> VesselResult<PathBuf> {
    if !is_absolute(container_path) {
        return Err(VesselError::InvalidArg(format!(
            "container path must be absolute: {:?}",
            container_path
        )));
    }

    let mut pending: Vec<String> = split_components(container_path);
    pending.reverse();

    // Host path under construction and its container-relative depth. Depth
    // tracks how many components may be popped by `..` before escaping.
    let mut resolved = root.to_path_buf();
    let mut depth: usize = 0;
    let mut hops = 0usize;

    while let Some(comp) = pending.pop() {
        match comp.as_str() {
            "" | "." => continue,
            ".." => {
                if depth == 0 {
                    return Err(VesselError::InvalidArg(format!(
                        "path escapes container root: {:?}",
                        container_path
                    )));
                }
                depth -= 1;
                resolved.pop();
            }
            name => {
                let candidate = resolved.join(name);
                if candidate.is_symlink() {
                    hops += 1;
                    if hops > MAX_SYMLINK_HOPS {
                        return Err(VesselError::InvalidArg(format!(
                            "too many symlinks resolving {:?}",
                            container_path
                        )));
                    }
                    let target = std::fs::read_link(&candidate).map_err(|e| {
                        VesselError::Internal(format!(
                            "readlink {}: {}",
                            candidate.display(),
                            e
                        ))
                    })?;
                    let target_str = target.to_string_lossy().into_owned();
                    if is_absolute(&target_str) {
                        // Absolute targets resolve from the container root.
                        resolved = root.to_path_buf();
                        depth = 0;
                    }
                    let mut link_comps = split_components(&target_str);
                    link_comps.reverse();
                    pending.extend(link_comps);
                } else {
                    resolved = candidate;
                    depth += 1;
                }
            }
        }
    }

    debug_assert!(resolved.starts_with(root));
    Ok(resolved)
}

/// Convert a confined host path back to its container-relative form.
///
/// Only valid for paths produced by [`confine`] with the same root.
pub fn to_container_path(root: &Path, host_path: &Path) -> String {
    let rel = host_path.strip_prefix(root).unwrap_or(host_path);
    let mut out = String::from("/");
    let mut first = true;
    for comp in rel.components() {
        if let Component::Normal(c) = comp {
            if !first {
                out.push('/');
            }
            out.push_str(&c.to_string_lossy());
            first = false;
        }
    }
    out
}

fn is_absolute(path: &str) -> bool {
    path.starts_with('/') || (cfg!(windows) && path.starts_with('\\'))
}

fn split_components(path: &str) -> Vec<String> {
    let normalized = if cfg!(windows) {
        path.replace('\\', "/")
    } else {
        path.to_string()
    };
    normalized.split('/').map(str::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use vessel_shared::ErrorKind;

    fn root() -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("ctr");
        std::fs::create_dir_all(root.join("etc")).unwrap();
        std::fs::write(root.join("etc/hosts"), "localhost\n").unwrap();
        (dir, root)
    }

    #[test]
    fn plain_paths_resolve_under_root() {
        let (_t, root) = root();
        let p = confine(&root, "/etc/hosts").unwrap();
        assert_eq!(p, root.join("etc/hosts"));
        assert!(p.starts_with(&root));
    }

    #[test]
    fn relative_paths_rejected() {
        let (_t, root) = root();
        let err = confine(&root, "etc/hosts").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArg);
    }

    #[test]
    fn dotdot_escape_rejected() {
        let (_t, root) = root();
        assert_eq!(
            confine(&root, "/../etc/shadow").unwrap_err().kind(),
            ErrorKind::InvalidArg
        );
        assert_eq!(
            confine(&root, "/etc/../../etc/shadow").unwrap_err().kind(),
            ErrorKind::InvalidArg
        );
    }

    #[test]
    fn dotdot_within_root_is_fine() {
        let (_t, root) = root();
        let p = confine(&root, "/etc/../etc/hosts").unwrap();
        assert_eq!(p, root.join("etc/hosts"));
    }

    #[test]
    fn missing_final_component_resolves() {
        let (_t, root) = root();
        let p = confine(&root, "/etc/new-file").unwrap();
        assert_eq!(p, root.join("etc/new-file"));
    }

    #[cfg(unix)]
    #[test]
    fn absolute_symlink_reroots_at_container_root() {
        let (_t, root) = root();
        std::os::unix::fs::symlink("/etc/hosts", root.join("link")).unwrap();
        let p = confine(&root, "/link").unwrap();
        assert_eq!(p, root.join("etc/hosts"));
    }

    #[cfg(unix)]
    #[test]
    fn relative_symlink_escape_rejected() {
        let (_t, root) = root();
        std::os::unix::fs::symlink("../../outside", root.join("evil")).unwrap();
        assert_eq!(
            confine(&root, "/evil").unwrap_err().kind(),
            ErrorKind::InvalidArg
        );
    }

    #[cfg(unix)]
    #[test]
    fn symlink_loop_rejected() {
        let (_t, root) = root();
        std::os::unix::fs::symlink("/b", root.join("a")).unwrap();
        std::os::unix::fs::symlink("/a", root.join("b")).unwrap();
        assert_eq!(
            confine(&root, "/a").unwrap_err().kind(),
            ErrorKind::InvalidArg
        );
    }

    #[test]
    fn container_path_roundtrip() {
        let (_t, root) = root();
        let host = confine(&root, "/etc/hosts").unwrap();
        assert_eq!(to_container_path(&root, &host), "/etc/hosts");
        assert_eq!(to_container_path(&root, &root), "/");
    }
}
