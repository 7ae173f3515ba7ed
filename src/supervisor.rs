use crate::{
    config::Config,
    reactor::{bind_listener, Reactor},
    response::RequestHandler,
    tls::TlsContext,
};
use anyhow::{bail, Context};
use log::{error, info, warn};
use signal_hook::consts::{SIGINT, SIGTERM};
use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

/// Entry point after argument parsing: resolves certificates, forks one
/// pinned reactor per worker, forwards shutdown signals and reaps.
pub fn run(config: &Config) -> anyhow::Result<()> {
    // a peer closing mid-write must not kill the process
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_IGN);
    }
    let shutdown = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(SIGTERM, shutdown.clone())
        .context("installing SIGTERM handler")?;
    signal_hook::flag::register(SIGINT, shutdown.clone())
        .context("installing SIGINT handler")?;

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .with_context(|| format!("invalid listen address {}:{}", config.host, config.port))?;

    // Certificates are resolved and loaded once, before any fork, so
    // every child inherits an initialised TLS context with absolute
    // paths and no dependence on the working directory.
    let tls = match (&config.cert, &config.key) {
        _ if !config.tls => None,
        (Some(cert), Some(key)) => {
            let cert = std::fs::canonicalize(cert)
                .with_context(|| format!("resolving certificate path {}", cert.display()))?;
            let key = std::fs::canonicalize(key)
                .with_context(|| format!("resolving key path {}", key.display()))?;
            Some(TlsContext::new(&cert, &key)?)
        }
        _ => bail!("--tls requires both --cert and --key"),
    };

    // fail fast on an unbindable address instead of from inside a child
    drop(bind_listener(addr).context("probe bind")?);

    info!(
        "listening on {} ({} workers{})",
        addr,
        config.workers,
        if tls.is_some() { ", TLS" } else { "" }
    );

    if config.workers <= 1 {
        return run_reactor(addr, tls, config.max_connections, &shutdown);
    }

    let mut children = Vec::with_capacity(config.workers);
    for index in 0..config.workers {
        match unsafe { libc::fork() } {
            -1 => {
                let err = std::io::Error::last_os_error();
                terminate(&children);
                return Err(err).context("fork");
            }
            0 => {
                pin_to_cpu(index);
                let code = match run_reactor(addr, tls.clone(), config.max_connections, &shutdown)
                {
                    Ok(()) => 0,
                    Err(err) => {
                        error!("reactor failed: {:#}", err);
                        1
                    }
                };
                std::process::exit(code);
            }
            pid => children.push(pid),
        }
    }
    drop(tls);

    while !shutdown.load(Ordering::Relaxed) && !children.is_empty() {
        let mut status = 0;
        let pid = unsafe { libc::waitpid(-1, &mut status, libc::WNOHANG) };
        if pid > 0 {
            warn!("worker {} exited early", pid);
            children.retain(|&child| child != pid);
        }
        std::thread::sleep(Duration::from_millis(200));
    }

    info!("supervisor shutting down {} workers", children.len());
    terminate(&children);
    Ok(())
}

fn run_reactor(
    addr: SocketAddr,
    tls: Option<TlsContext>,
    max_connections: usize,
    shutdown: &AtomicBool,
) -> anyhow::Result<()> {
    let mut reactor = Reactor::new(
        addr,
        tls,
        max_connections,
        Box::new(|| Box::new(crate::response::EchoHandler) as Box<dyn RequestHandler>),
    )?;
    reactor.run(shutdown)
}

/// SIGTERM each child, then reap them all.
fn terminate(children: &[libc::pid_t]) {
    for &pid in children {
        unsafe {
            libc::kill(pid, libc::SIGTERM);
        }
    }
    for &pid in children {
        let mut status = 0;
        unsafe {
            libc::waitpid(pid, &mut status, 0);
        }
    }
}

/// Pins the calling process to one CPU; reactors never migrate.
fn pin_to_cpu(index: usize) {
    let cpu = index % num_cpus::get();
    unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_ZERO(&mut set);
        libc::CPU_SET(cpu, &mut set);
        if libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set) != 0 {
            warn!("pinning to cpu {} failed", cpu);
        }
    }
}
