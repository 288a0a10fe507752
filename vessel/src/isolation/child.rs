//! Child-side finalization.
//!
//! Runs in the cloned child between namespace entry and exec: join declared
//! namespaces, set the hostname, apply mounts, pivot into the container
//! root, reduce privileges, then exec the entrypoint. Any failure is
//! reported over the error pipe as `stage\x1fmessage` and the child exits
//! 127.

use std::collections::HashSet;
use std::ffi::CString;
use std::os::fd::{AsFd, RawFd};
use std::path::Path;

use nix::mount::{MntFlags, MsFlags, mount, umount2};

use vessel_shared::cri::MountPropagation;

use super::clone::STAGE_SEP;
use super::{LaunchSpec, MountKind, NsKind};

/// Raw descriptors handed to the child; everything else it inherits is
/// either close-on-exec or harmless.
pub(crate) struct ChildContext {
    pub stdout_w: RawFd,
    pub stderr_w: RawFd,
    pub sync_r: RawFd,
    pub err_w: RawFd,
}

const CHILD_FAILURE: isize = 127;
const FALLBACK_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

pub(crate) fn run(spec: &LaunchSpec, ctx: &ChildContext) -> isize {
    // Wire stdio first so later failures are at least visible in the log.
    // SAFETY: plain dup2 onto the standard descriptors.
    unsafe {
        libc::dup2(ctx.stdout_w, 1);
        libc::dup2(ctx.stderr_w, 2);
    }

    // Block until the parent has written the UID/GID maps.
    let mut byte = [0u8; 1];
    loop {
        // SAFETY: reading one byte from an inherited pipe fd.
        let n = unsafe { libc::read(ctx.sync_r, byte.as_mut_ptr().cast(), 1) };
        if n == 1 {
            break;
        }
        if n == 0 {
            // Parent died before releasing us.
            return CHILD_FAILURE;
        }
        if std::io::Error::last_os_error().raw_os_error() != Some(libc::EINTR) {
            return fail(ctx, "sync", &std::io::Error::last_os_error().to_string());
        }
    }

    for (kind, path) in &spec.plan.join {
        let file = match std::fs::File::open(path) {
            Ok(f) => f,
            Err(e) => return fail(ctx, "setns", &format!("{}: {}", path.display(), e)),
        };
        if let Err(e) = nix::sched::setns(file.as_fd(), clone_flag(*kind)) {
            return fail(ctx, "setns", &format!("{}: {}", path.display(), e));
        }
    }

    if let Some(hostname) = &spec.plan.hostname
        && let Err(e) = nix::unistd::sethostname(hostname)
    {
        return fail(ctx, "hostname", &e.to_string());
    }

    if spec.plan.new_mount
        && let Err(stage_err) = setup_mounts(spec)
    {
        return fail(ctx, stage_err.0, &stage_err.1);
    }

    if let Err(e) = reduce_privileges(spec) {
        return fail(ctx, e.0, &e.1);
    }

    if let Err(e) = change_workdir(spec) {
        return fail(ctx, "chdir", &e);
    }

    exec_entrypoint(spec, ctx)
}

type StageError = (&'static str, String);

fn setup_mounts(spec: &LaunchSpec) -> Result<(), StageError> {
    let rootfs = &spec.rootfs;

    // Keep every mount private to this namespace.
    mount(
        None::<&str>,
        "/",
        None::<&str>,
        MsFlags::MS_REC | MsFlags::MS_PRIVATE,
        None::<&str>,
    )
    .map_err(|e| ("mounts", format!("making / private: {}", e)))?;

    // pivot_root needs the new root to be a mount point.
    mount(
        Some(rootfs),
        rootfs,
        None::<&str>,
        MsFlags::MS_BIND,
        None::<&str>,
    )
    .map_err(|e| ("mounts", format!("binding rootfs: {}", e)))?;

    for m in &spec.mounts {
        if m.kind == MountKind::Proc {
            // proc mounts happen after the pivot.
            continue;
        }
        let target = rootfs.join(m.target.trim_start_matches('/'));
        std::fs::create_dir_all(&target)
            .map_err(|e| ("mounts", format!("creating {}: {}", m.target, e)))?;
        match m.kind {
            MountKind::Bind => {
                let source = m
                    .source
                    .as_ref()
                    .ok_or(("mounts", format!("bind mount {} has no source", m.target)))?;
                mount(
                    Some(source),
                    &target,
                    None::<&str>,
                    MsFlags::MS_BIND | MsFlags::MS_REC,
                    None::<&str>,
                )
                .map_err(|e| ("mounts", format!("binding {}: {}", m.target, e)))?;
                if m.readonly {
                    mount(
                        None::<&str>,
                        &target,
                        None::<&str>,
                        MsFlags::MS_BIND | MsFlags::MS_REMOUNT | MsFlags::MS_RDONLY,
                        None::<&str>,
                    )
                    .map_err(|e| ("mounts", format!("read-only remount {}: {}", m.target, e)))?;
                }
                let propagation = match m.propagation {
                    MountPropagation::Private => MsFlags::MS_PRIVATE,
                    MountPropagation::HostToContainer => MsFlags::MS_SLAVE,
                    MountPropagation::Bidirectional => MsFlags::MS_SHARED,
                };
                mount(
                    None::<&str>,
                    &target,
                    None::<&str>,
                    propagation | MsFlags::MS_REC,
                    None::<&str>,
                )
                .map_err(|e| ("mounts", format!("propagation of {}: {}", m.target, e)))?;
            }
            MountKind::Tmpfs => {
                mount(
                    Some("tmpfs"),
                    &target,
                    Some("tmpfs"),
                    MsFlags::empty(),
                    None::<&str>,
                )
                .map_err(|e| ("mounts", format!("tmpfs {}: {}", m.target, e)))?;
            }
            MountKind::Proc => unreachable!(),
        }
    }

    // The pivot: ".", "." then detach works without a scratch directory.
    nix::unistd::chdir(rootfs).map_err(|e| ("pivot_root", format!("chdir rootfs: {}", e)))?;
    nix::unistd::pivot_root(".", ".").map_err(|e| ("pivot_root", e.to_string()))?;
    umount2(".", MntFlags::MNT_DETACH)
        .map_err(|e| ("pivot_root", format!("detaching old root: {}", e)))?;
    nix::unistd::chdir("/").map_err(|e| ("pivot_root", format!("chdir /: {}", e)))?;

    if spec.plan.new_pid {
        // This child is pid 1 of the fresh namespace, so proc is coherent.
        std::fs::create_dir_all("/proc")
            .map_err(|e| ("mounts", format!("creating /proc: {}", e)))?;
        mount(
            Some("proc"),
            "/proc",
            Some("proc"),
            MsFlags::empty(),
            None::<&str>,
        )
        .map_err(|e| ("mounts", format!("mounting proc: {}", e)))?;
    }
    for m in spec.mounts.iter().filter(|m| m.kind == MountKind::Proc) {
        std::fs::create_dir_all(Path::new(&m.target))
            .map_err(|e| ("mounts", format!("creating {}: {}", m.target, e)))?;
        mount(
            Some("proc"),
            m.target.as_str(),
            Some("proc"),
            MsFlags::empty(),
            None::<&str>,
        )
        .map_err(|e| ("mounts", format!("mounting proc at {}: {}", m.target, e)))?;
    }

    Ok(())
}

fn reduce_privileges(spec: &LaunchSpec) -> Result<(), StageError> {
    drop_bounding_caps(spec)?;

    if spec.no_new_privs {
        nix::sys::prctl::set_no_new_privs().map_err(|e| ("no_new_privs", e.to_string()))?;
    }

    // Supplemental groups before the UID switch.
    if !spec.supplemental_groups.is_empty() {
        if !spec.idmap.allow_setgroups {
            return Err((
                "setgroups",
                "supplemental groups requested but setgroups is denied".to_string(),
            ));
        }
        let groups: Vec<nix::unistd::Gid> = spec
            .supplemental_groups
            .iter()
            .map(|g| nix::unistd::Gid::from_raw(*g))
            .collect();
        nix::unistd::setgroups(&groups).map_err(|e| ("setgroups", e.to_string()))?;
    }

    let (uid, gid) = spec.idmap.run_as;
    nix::unistd::setgid(nix::unistd::Gid::from_raw(gid))
        .map_err(|e| ("setuid", format!("setgid({}): {}", gid, e)))?;
    nix::unistd::setuid(nix::unistd::Uid::from_raw(uid))
        .map_err(|e| ("setuid", format!("setuid({}): {}", uid, e)))?;
    Ok(())
}

fn drop_bounding_caps(spec: &LaunchSpec) -> Result<(), StageError> {
    let keep: HashSet<String> = spec.caps.effective().into_iter().collect();
    for cap in caps::all() {
        if keep.contains(&cap.to_string()) {
            continue;
        }
        match caps::drop(None, caps::CapSet::Bounding, cap) {
            Ok(()) => {}
            Err(e) => {
                // Unknown-to-this-kernel capabilities are already absent.
                if matches!(caps::has_cap(None, caps::CapSet::Bounding, cap), Ok(true)) {
                    return Err(("caps", format!("dropping {}: {}", cap, e)));
                }
            }
        }
    }
    Ok(())
}

fn change_workdir(spec: &LaunchSpec) -> Result<(), String> {
    let dir = if spec.working_dir.is_empty() {
        "/"
    } else {
        &spec.working_dir
    };
    std::fs::create_dir_all(dir).map_err(|e| format!("creating {}: {}", dir, e))?;
    nix::unistd::chdir(dir).map_err(|e| format!("{}: {}", dir, e))
}

fn exec_entrypoint(spec: &LaunchSpec, ctx: &ChildContext) -> isize {
    let program = match CString::new(spec.command[0].as_str()) {
        Ok(p) => p,
        Err(_) => return fail(ctx, "exec", "NUL in program name"),
    };
    let args: Vec<CString> = spec
        .command
        .iter()
        .filter_map(|a| CString::new(a.as_str()).ok())
        .collect();

    let mut env: Vec<CString> = Vec::with_capacity(spec.env.len() + 1);
    let mut has_path = false;
    for (key, value) in &spec.env {
        if key == "PATH" {
            has_path = true;
        }
        if let Ok(pair) = CString::new(format!("{}={}", key, value)) {
            env.push(pair);
        }
    }
    if !has_path
        && let Ok(pair) = CString::new(format!("PATH={}", FALLBACK_PATH))
    {
        env.push(pair);
    }

    match nix::unistd::execvpe(&program, &args, &env) {
        Ok(infallible) => match infallible {},
        Err(e) => fail(ctx, "exec", &format!("{}: {}", spec.command[0], e)),
    }
}

/// Report a stage failure over the error pipe; returns the child exit code.
fn fail(ctx: &ChildContext, stage: &str, message: &str) -> isize {
    let mut buf = Vec::with_capacity(stage.len() + 1 + message.len());
    buf.extend_from_slice(stage.as_bytes());
    buf.push(STAGE_SEP);
    buf.extend_from_slice(message.as_bytes());
    // SAFETY: single write of a local buffer to an inherited pipe fd.
    unsafe {
        libc::write(ctx.err_w, buf.as_ptr().cast(), buf.len());
    }
    CHILD_FAILURE
}

fn clone_flag(kind: NsKind) -> nix::sched::CloneFlags {
    use nix::sched::CloneFlags;
    match kind {
        NsKind::Mount => CloneFlags::CLONE_NEWNS,
        NsKind::Pid => CloneFlags::CLONE_NEWPID,
        NsKind::Net => CloneFlags::CLONE_NEWNET,
        NsKind::Ipc => CloneFlags::CLONE_NEWIPC,
        NsKind::Uts => CloneFlags::CLONE_NEWUTS,
        NsKind::User => CloneFlags::CLONE_NEWUSER,
    }
}
