//! Spawns a target under `PTRACE_TRACEME` and single-steps it, handing back
//! the instruction pointer and a raw opcode window at each step.
//!
//! `examples/other_examples/bd7679b4_trailofbits-mttn__src-trace.rs.rs` is
//! the pack's one real ptrace tracer, and its `ptrace`/`wait`/`uio` call
//! shapes are followed directly here. That example spawns its tracee via the
//! `spawn_ptrace` crate's `Command::spawn_ptrace()`, which isn't part of this
//! project's dependency set; the spawn sequence below instead follows
//! `original_source/src/tracker.c`'s own `fork()` + `personality(ADDR_NO_RANDOMIZE)`
//! + `ptrace(PTRACE_TRACEME)` + `execve()` directly, via `nix::unistd::fork`.

use std::ffi::CString;
use std::path::Path;

use anyhow::{Context, Result};
use nix::sys::personality::{self, Persona};
use nix::sys::ptrace;
use nix::sys::uio::{process_vm_readv, RemoteIoVec};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{execvp, fork, ForkResult, Pid};

/// Matches `original_source/src/tracker.c`'s `MAX_OPCODE_BYTES`: two 8-byte
/// reads, one more than the x86 instruction-length limit of 15 so a decoder
/// always has a full instruction's worth of bytes even at the window's edge.
pub const MAX_READ_WINDOW: usize = 16;

/// One observed step of the tracee, or its termination.
pub enum Step {
    Instruction { address: u64, bytes: [u8; MAX_READ_WINDOW] },
    Exited { status: i32 },
}

/// A live `PTRACE_TRACEME` child, single-stepped one instruction at a time.
pub struct Tracer {
    pid: Pid,
    terminated: bool,
}

impl Tracer {
    /// Fork, disable ASLR, request tracing, and `execvp` into `exec args..`.
    /// Blocks until the post-exec `SIGTRAP` stop so the first call to
    /// [`Tracer::step`] observes the entry point.
    pub fn spawn(exec: &Path, args: &[String]) -> Result<Self> {
        let program = path_to_cstring(exec)?;
        let mut argv: Vec<CString> = Vec::with_capacity(args.len() + 1);
        argv.push(program.clone());
        for a in args {
            argv.push(CString::new(a.as_str()).context("argument contains a NUL byte")?);
        }

        // SAFETY: the child performs only async-signal-safe operations
        // (ptrace::traceme, personality::set, execvp) before exec or exit.
        match unsafe { fork() }.context("fork failed")? {
            ForkResult::Child => {
                if ptrace::traceme().is_err() {
                    std::process::exit(127);
                }
                let _ = personality::set(Persona::ADDR_NO_RANDOMIZE);
                let _ = execvp(&program, &argv);
                // execvp only returns on failure.
                std::process::exit(127);
            }
            ForkResult::Parent { child } => {
                match waitpid(child, None).context("waiting for initial exec stop")? {
                    WaitStatus::Stopped(..) => {}
                    WaitStatus::Exited(_, status) => {
                        anyhow::bail!("target exited immediately with status {status}");
                    }
                    other => anyhow::bail!("unexpected wait status after spawn: {other:?}"),
                }
                Ok(Self {
                    pid: child,
                    terminated: false,
                })
            }
        }
    }

    /// Read the tracee's current instruction pointer and the opcode bytes at
    /// it, without advancing it. Returns `None` once the tracee has exited.
    pub fn peek(&self) -> Result<Option<(u64, [u8; MAX_READ_WINDOW])>> {
        if self.terminated {
            return Ok(None);
        }
        let regs = ptrace::getregs(self.pid).context("PTRACE_GETREGS")?;
        let ip = instruction_pointer(&regs);
        let bytes = self.read_window(ip)?;
        Ok(Some((ip, bytes)))
    }

    /// Single-step the tracee by one instruction and wait for it to stop
    /// again (or exit). `ptrace::step` can transiently fail while the tracee
    /// is between signal-delivery states; `original_source/src/tracker.c`
    /// retries the equivalent `PTRACE_SINGLESTEP` call in that case.
    pub fn step(&mut self) -> Result<Step> {
        loop {
            if ptrace::step(self.pid, None).is_ok() {
                break;
            }
        }

        match waitpid(self.pid, None).context("waiting after PTRACE_SINGLESTEP")? {
            WaitStatus::Exited(_, status) => {
                self.terminated = true;
                Ok(Step::Exited { status })
            }
            WaitStatus::Signaled(..) => {
                self.terminated = true;
                Ok(Step::Exited { status: -1 })
            }
            _ => {
                let regs = ptrace::getregs(self.pid).context("PTRACE_GETREGS")?;
                let ip = instruction_pointer(&regs);
                let bytes = self.read_window(ip)?;
                Ok(Step::Instruction { address: ip, bytes })
            }
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    fn read_window(&self, addr: u64) -> Result<[u8; MAX_READ_WINDOW]> {
        let mut bytes = [0u8; MAX_READ_WINDOW];
        let remote = RemoteIoVec {
            base: addr as usize,
            len: MAX_READ_WINDOW,
        };
        let local = [std::io::IoSliceMut::new(&mut bytes)];
        process_vm_readv(self.pid, &local, &[remote]).context("process_vm_readv")?;
        Ok(bytes)
    }
}

#[cfg(target_arch = "x86_64")]
fn instruction_pointer(regs: &libc::user_regs_struct) -> u64 {
    regs.rip
}

fn path_to_cstring(path: &Path) -> Result<CString> {
    let bytes = path.as_os_str().to_str().context("non-UTF-8 executable path")?;
    CString::new(bytes).context("executable path contains a NUL byte")
}
