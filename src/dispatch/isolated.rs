use super::protocol::{
    decode_reply, encode_action, encode_request, CreateControllerRequest, DecodedReply, Inbound,
};
use super::{fault_error, incompatible, Action, ActionExecutor, ActionKind, ControllerArgs};
use crate::callback::ActionReporter;
use crate::config::{DriverConfig, IsolationStrategy};
use crate::driver::DriverError;
use crate::modules::{FrameworkModule, ModuleLoadError};
use crate::shared::DriverLogger;
use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct Routes {
    open: bool,
    senders: HashMap<u64, Sender<Inbound>>,
    /// Pending `create_controller` request. While set it is the only
    /// outstanding request and takes lines that carry no usable id.
    construction: Option<u64>,
}

type SharedRoutes = Arc<Mutex<Routes>>;

fn relock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Executes actions inside a separate host process.
///
/// Requests are written to the host's stdin one JSON line at a time; a reader
/// thread routes reply lines to the waiting request by id. The stdin lock is
/// only held for the duration of one write, so a `StopRun` can be delivered
/// while a `Run` is waiting for replies.
pub struct IsolatedExecutor {
    framework: String,
    host: PathBuf,
    child: Mutex<Child>,
    stdin: Mutex<Option<ChildStdin>>,
    routes: SharedRoutes,
    next_id: AtomicU64,
    result_timeout: Option<Duration>,
    shutdown_grace: Duration,
    log: DriverLogger,
}

impl IsolatedExecutor {
    pub fn create(
        framework: &FrameworkModule,
        args: &ControllerArgs,
        config: &DriverConfig,
        log: DriverLogger,
    ) -> Result<Self, DriverError> {
        let executor = Self::spawn(framework, config, log)?;
        executor.create_controller(
            &framework.descriptor.controller,
            framework.descriptor.api_version,
            args,
        )?;
        Ok(executor)
    }

    fn spawn(
        framework: &FrameworkModule,
        config: &DriverConfig,
        log: DriverLogger,
    ) -> Result<Self, DriverError> {
        let name = framework.name().to_string();
        let host = framework.descriptor.host_path(&framework.dir).ok_or_else(|| {
            ModuleLoadError::HostUndeclared {
                framework: name.clone(),
            }
        })?;

        let mut command = Command::new(&host);
        command
            .current_dir(&framework.dir)
            .args(&framework.descriptor.host_args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        for (k, v) in &config.host_env {
            command.env(k, v);
        }

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(ModuleLoadError::HostMissing {
                    framework: name,
                    host: host.display().to_string(),
                }
                .into())
            }
            Err(source) => {
                return Err(ModuleLoadError::HostSpawn {
                    host: host.display().to_string(),
                    source,
                }
                .into())
            }
        };

        let pipe_error = |what: &str| DriverError::Io {
            path: host.display().to_string(),
            source: std::io::Error::other(format!("missing {what} pipe")),
        };
        let stdin = child.stdin.take().ok_or_else(|| pipe_error("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| pipe_error("stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| pipe_error("stderr"))?;

        let routes: SharedRoutes = Arc::new(Mutex::new(Routes {
            open: true,
            ..Routes::default()
        }));

        let reader_routes = Arc::clone(&routes);
        let reader_log = log.clone();
        thread::spawn(move || {
            let reader = BufReader::new(stdout);
            for line in reader.lines() {
                let Ok(line) = line else {
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                route_reply(&reader_routes, &line, &reader_log);
            }
            let mut routes = relock(&reader_routes);
            routes.open = false;
            routes.senders.clear();
            drop(routes);
            reader_log.info("host.exited", "isolation host closed its output");
        });

        let stderr_log = log.clone();
        thread::spawn(move || {
            let reader = BufReader::new(stderr);
            for line in reader.lines().map_while(Result::ok) {
                stderr_log.debug("host.stderr", &line);
            }
        });

        log.info(
            "host.spawned",
            &format!("isolation host {} (pid {})", host.display(), child.id()),
        );

        Ok(Self {
            framework: name,
            host,
            child: Mutex::new(child),
            stdin: Mutex::new(Some(stdin)),
            routes,
            next_id: AtomicU64::new(1),
            result_timeout: config.result_timeout(),
            shutdown_grace: config.host_shutdown_grace(),
            log,
        })
    }

    /// Constructs the controller inside the host. A reply of the wrong shape
    /// is how an older or newer framework shows itself.
    fn create_controller(
        &self,
        controller: &str,
        declared_api: Option<u32>,
        args: &ControllerArgs,
    ) -> Result<(), DriverError> {
        let request = CreateControllerRequest {
            controller,
            target: &args.target_path,
            id_prefix: &args.id_prefix,
            settings: &args.settings,
        };
        let (id, rx) = self.register(ActionKind::Load)?;
        relock(&self.routes).construction = Some(id);
        let result = self
            .encode(ActionKind::Load, encode_request(id, &request))
            .and_then(|line| self.send(&line))
            .and_then(|()| self.receive(ActionKind::Load, &rx, deadline(self.result_timeout)));
        self.unregister(id);

        match result? {
            Inbound::Created(created) => {
                if created.controller != controller {
                    self.log.warn(
                        "host.controller_renamed",
                        &format!(
                            "requested `{controller}`, host created `{}`",
                            created.controller
                        ),
                    );
                }
                if let Some(declared) = declared_api.filter(|v| *v != created.api_version) {
                    self.log.warn(
                        "host.api_version_differs",
                        &format!(
                            "descriptor declares api_version {declared}, host reports {}",
                            created.api_version
                        ),
                    );
                }
                self.log.info(
                    "dispatch.controller_created",
                    &format!(
                        "isolated controller `{}` api_version {}",
                        created.controller, created.api_version
                    ),
                );
                Ok(())
            }
            Inbound::Fault(fault) => Err(fault_error(
                &self.framework,
                ActionKind::Load,
                fault.into_controller_fault(ActionKind::Load),
                &self.log,
            )),
            Inbound::Report(_) | Inbound::Done => Err(incompatible(
                &self.framework,
                "host answered controller construction without a handshake",
                &self.log,
            )),
            Inbound::Malformed(raw) => Err(incompatible(
                &self.framework,
                format!("unexpected controller construction reply `{raw}`"),
                &self.log,
            )),
        }
    }

    fn register(&self, action: ActionKind) -> Result<(u64, Receiver<Inbound>), DriverError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel();
        let mut routes = relock(&self.routes);
        if !routes.open {
            return Err(DriverError::HostDisconnected { action });
        }
        routes.senders.insert(id, tx);
        Ok((id, rx))
    }

    fn unregister(&self, id: u64) {
        let mut routes = relock(&self.routes);
        routes.senders.remove(&id);
        if routes.construction == Some(id) {
            routes.construction = None;
        }
    }

    fn encode(
        &self,
        action: ActionKind,
        encoded: Result<String, serde_json::Error>,
    ) -> Result<String, DriverError> {
        encoded.map_err(|err| DriverError::Io {
            path: self.host.display().to_string(),
            source: std::io::Error::other(format!("failed to encode {action} request: {err}")),
        })
    }

    fn send(&self, line: &str) -> Result<(), DriverError> {
        let io_error = |source| DriverError::Io {
            path: self.host.display().to_string(),
            source,
        };
        let mut stdin = relock(&self.stdin);
        let pipe = stdin
            .as_mut()
            .ok_or_else(|| io_error(std::io::Error::other("host stdin closed")))?;
        writeln!(pipe, "{line}").map_err(io_error)?;
        pipe.flush().map_err(io_error)
    }

    fn receive(
        &self,
        action: ActionKind,
        rx: &Receiver<Inbound>,
        deadline: Option<Instant>,
    ) -> Result<Inbound, DriverError> {
        match deadline {
            None => rx
                .recv()
                .map_err(|_| DriverError::HostDisconnected { action }),
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                rx.recv_timeout(remaining).map_err(|err| match err {
                    RecvTimeoutError::Timeout => DriverError::ResultTimeout {
                        action,
                        timeout_ms: self
                            .result_timeout
                            .map(|t| t.as_millis() as u64)
                            .unwrap_or_default(),
                    },
                    RecvTimeoutError::Disconnected => DriverError::HostDisconnected { action },
                })
            }
        }
    }

    fn pump(
        &self,
        action: ActionKind,
        rx: &Receiver<Inbound>,
        reporter: &dyn ActionReporter,
    ) -> Result<(), DriverError> {
        let deadline = deadline(self.result_timeout);
        while !reporter.is_complete() {
            match self.receive(action, rx, deadline)? {
                Inbound::Report(message) => reporter.report(&message),
                Inbound::Done if reporter.is_complete() || action == ActionKind::Count => {
                    return Ok(())
                }
                Inbound::Done => return Err(DriverError::MissingResult { action }),
                Inbound::Fault(fault) => {
                    return Err(fault_error(
                        &self.framework,
                        action,
                        fault.into_controller_fault(action),
                        &self.log,
                    ))
                }
                Inbound::Created(_) => {
                    return Err(incompatible(
                        &self.framework,
                        format!("host answered {action} with a controller handshake"),
                        &self.log,
                    ))
                }
                Inbound::Malformed(raw) => {
                    return Err(incompatible(
                        &self.framework,
                        format!("unexpected {action} reply `{raw}`"),
                        &self.log,
                    ))
                }
            }
        }
        Ok(())
    }

    fn shutdown(&self) {
        drop(relock(&self.stdin).take());

        let mut child = relock(&self.child);
        let start = Instant::now();
        loop {
            match child.try_wait() {
                Ok(Some(_)) => return,
                Ok(None) if start.elapsed() < self.shutdown_grace => {
                    thread::sleep(Duration::from_millis(10));
                }
                Ok(None) => break,
                Err(err) => {
                    self.log
                        .warn("host.wait_failed", &format!("isolation host wait: {err}"));
                    break;
                }
            }
        }
        self.log.warn(
            "host.killed",
            "isolation host did not exit after stdin closed; killing it",
        );
        let _ = child.kill();
        let _ = child.wait();
    }
}

fn deadline(timeout: Option<Duration>) -> Option<Instant> {
    timeout.map(|t| Instant::now() + t)
}

fn route_reply(routes: &SharedRoutes, line: &str, log: &DriverLogger) {
    match decode_reply(line) {
        DecodedReply::Routed { id, inbound } => {
            let routes = relock(routes);
            match routes.senders.get(&id) {
                Some(tx) => {
                    let _ = tx.send(inbound);
                }
                None => log.debug(
                    "host.unrouted_reply",
                    &format!("reply for request {id} has no waiter"),
                ),
            }
        }
        DecodedReply::Unroutable { reason } => {
            let routes = relock(routes);
            let pending = routes
                .construction
                .and_then(|id| routes.senders.get(&id));
            match pending {
                Some(tx) => {
                    let _ = tx.send(Inbound::Malformed(line.to_string()));
                }
                None => log.warn(
                    "host.malformed_reply",
                    &format!("dropped host output `{line}`: {reason}"),
                ),
            }
        }
    }
}

impl ActionExecutor for IsolatedExecutor {
    fn strategy(&self) -> IsolationStrategy {
        IsolationStrategy::Isolated
    }

    fn framework(&self) -> &str {
        &self.framework
    }

    fn dispatch(&self, action: &Action, reporter: &dyn ActionReporter) -> Result<(), DriverError> {
        let kind = action.kind();
        let (id, rx) = self.register(kind)?;
        let result = self
            .encode(kind, encode_action(id, action))
            .and_then(|line| self.send(&line))
            .and_then(|()| self.pump(kind, &rx, reporter));
        self.unregister(id);
        result
    }

    fn signal(&self, action: &Action) -> Result<(), DriverError> {
        let kind = action.kind();
        if !relock(&self.routes).open {
            return Err(DriverError::HostDisconnected { action: kind });
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let line = self.encode(kind, encode_action(id, action))?;
        self.send(&line)
    }
}

impl Drop for IsolatedExecutor {
    fn drop(&mut self) {
        self.shutdown();
    }
}
