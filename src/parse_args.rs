use psc_mailbox::port::{DEFAULT_DEVICE_PATH, DEFAULT_MEM_PATH};
use psc_mailbox::regs::MBOX_BASE;
use psc_mailbox::{Backend, PortConfig, DEFAULT_TIMEOUT};
use spdm_protocol::{parse_transport, TRANSPORT_MCTP};
use spdm_proxy_server::DEFAULT_PORT;
use std::path::PathBuf;
use std::time::Duration;

const HELP: &str = "\
spdm-proxy - SPDM platform server for the PSC mailbox

Accepts spdm-emu platform connections and relays NORMAL requests to the
PSC through its register mailbox.

USAGE:
  spdm-proxy [OPTIONS]

OPTIONS:
  -h, --help               Prints help information
  -p, --port <n>           TCP port to listen on (default: 2323)
  --transport <type>       Transport tag: none, mctp, pci-doe or a number (default: mctp)
  --backend <kind>         Register access: auto, mem, file, loopback (default: auto)
  --mem-path <path>        Memory device to map (default: /dev/mem)
  --base <addr>            Physical base of the mailbox window (hex, default: 0x12060000)
  --device <path>          Register window file (default: /sys/devices/platform/MLNXBF3A:00/psc_mbox)
  --timeout-ms <n>         Mailbox exchange timeout in milliseconds (default: 1000)
  -v, --verbose            Show connection and request events
  -vv, --trace             Show every mailbox segment
  --log <file>             Write log output to file instead of stderr
";

/// Verbosity level for debug output
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Verbosity {
    /// Startup, connection summaries and errors
    #[default]
    Quiet = 0,
    /// Every request and response
    Verbose = 1,
    /// Every mailbox segment
    Trace = 2,
}

#[derive(Debug)]
pub struct AppArgs {
    pub port: u16,
    pub transport_type: u32,
    pub backend: Backend,
    pub mem_path: PathBuf,
    pub base: u64,
    pub device_path: PathBuf,
    pub timeout: Duration,
    pub verbosity: Verbosity,
    pub log_file: Option<String>,
}

impl AppArgs {
    pub fn port_config(&self) -> PortConfig {
        PortConfig {
            backend: self.backend,
            mem_path: self.mem_path.clone(),
            base: self.base,
            device_path: self.device_path.clone(),
        }
    }
}

fn parse_hex(s: &str) -> Result<u64, std::num::ParseIntError> {
    u64::from_str_radix(s.trim_start_matches("0x"), 16)
}

pub fn parse_args() -> Result<AppArgs, pico_args::Error> {
    let mut pargs = pico_args::Arguments::from_env();

    if pargs.contains(["-h", "--help"]) {
        print!("{}", HELP);
        std::process::exit(0);
    }

    parse_from(pargs)
}

fn parse_from(mut pargs: pico_args::Arguments) -> Result<AppArgs, pico_args::Error> {
    let verbosity = if pargs.contains("--trace") || pargs.contains("-vv") {
        Verbosity::Trace
    } else if pargs.contains(["-v", "--verbose"]) {
        Verbosity::Verbose
    } else {
        Verbosity::Quiet
    };

    let timeout = pargs
        .opt_value_from_str::<_, u64>("--timeout-ms")?
        .map(Duration::from_millis)
        .unwrap_or(DEFAULT_TIMEOUT);

    let args = AppArgs {
        port: pargs
            .opt_value_from_str(["-p", "--port"])?
            .unwrap_or(DEFAULT_PORT),
        transport_type: pargs
            .opt_value_from_fn("--transport", parse_transport)?
            .unwrap_or(TRANSPORT_MCTP),
        backend: pargs.opt_value_from_str("--backend")?.unwrap_or_default(),
        mem_path: pargs
            .opt_value_from_str("--mem-path")?
            .unwrap_or_else(|| PathBuf::from(DEFAULT_MEM_PATH)),
        base: pargs
            .opt_value_from_fn("--base", parse_hex)?
            .unwrap_or(MBOX_BASE),
        device_path: pargs
            .opt_value_from_str("--device")?
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DEVICE_PATH)),
        timeout,
        verbosity,
        log_file: pargs.opt_value_from_str("--log")?,
    };

    let remaining = pargs.finish();
    if !remaining.is_empty() {
        eprintln!("Warning: unused arguments left: {:?}.", remaining);
    }

    Ok(args)
}
