//! `hermes` — command-line launcher for Hermes board services.
//!
//! ```text
//! USAGE:
//!   hermes bridge                    Forward UDP datagrams to the page mailbox
//!   hermes hal-server                Serve register access over TCP
//!   hermes read <reg>                Masked read, local or via --server
//!   hermes write <reg> <value>       Masked write, local or via --server
//!   hermes mailbox-status            Dump the mailbox status block
//! ```
//!
//! `<reg>` is a word address (`0x10`) or, with `--map`, a register name.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use hermes_driver::mailbox::DEFAULT_PORT as BRIDGE_PORT;
use hermes_driver::prelude::*;
use hermes_driver::rpc::wire::parse_int_literal;
use hermes_regs::{MailboxLayout, Register, FULL_MASK};
use std::net::{SocketAddr, UdpSocket};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "hermes", about = "Hermes mailbox bridge and register tools", version)]
struct Cli {
    #[command(flatten)]
    window: WindowArgs,

    /// Debug logging (RUST_LOG overrides).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Args)]
struct WindowArgs {
    /// Physical base address of the AXI window.
    #[arg(long, global = true, env = "HERMES_AXI_BASE", default_value = "0x80000000", value_parser = parse_u64)]
    base: u64,

    /// Window length in bytes.
    #[arg(long, global = true, env = "HERMES_AXI_LEN", default_value = "0x100000", value_parser = parse_u64)]
    len: u64,

    /// Use an in-memory window instead of /dev/mem.
    #[arg(long, global = true)]
    software: bool,
}

#[derive(Args)]
struct TargetArgs {
    /// Word address, or register name when --map is given.
    reg: String,

    /// Field mask for a numeric address.
    #[arg(long, default_value = "0xffffffff", value_parser = parse_u32)]
    mask: u32,

    /// Address table (JSON) for register names.
    #[arg(long, env = "HERMES_ADDRESS_TABLE")]
    map: Option<PathBuf>,

    /// Go through a register server (host:port) instead of the local window.
    #[arg(long, env = "HERMES_SERVER")]
    server: Option<String>,

    /// Reply timeout for --server, in milliseconds.
    #[arg(long, default_value_t = 1000)]
    timeout_ms: u64,
}

#[derive(Subcommand)]
enum Cmd {
    /// Forward UDP datagrams to the firmware page mailbox.
    Bridge {
        /// UDP listen port.
        #[arg(long, env = "HERMES_UDP_PORT", default_value_t = BRIDGE_PORT)]
        port: u16,

        /// Word address of the mailbox status block.
        #[arg(long, default_value = "0", value_parser = parse_u32)]
        mailbox_base: u32,

        /// Give up on a firmware reply after this many milliseconds.
        #[arg(long, default_value_t = 1000)]
        timeout_ms: u64,

        /// Read the reply page without waiting for num_replies to change.
        #[arg(long)]
        no_check_replies: bool,

        /// Also serve register RPC on this address, sharing the window.
        #[arg(long)]
        rpc_bind: Option<SocketAddr>,
    },
    /// Serve masked register access over TCP.
    HalServer {
        /// Listen address.
        #[arg(long, env = "HERMES_RPC_BIND", default_value_t = ServerConfig::default().bind)]
        bind: SocketAddr,
    },
    /// Read a register.
    Read(TargetArgs),
    /// Write a register.
    Write {
        #[command(flatten)]
        target: TargetArgs,

        /// Field value (before shifting into the mask).
        #[arg(value_parser = parse_u32)]
        value: u32,
    },
    /// Print the mailbox status block.
    MailboxStatus {
        /// Word address of the mailbox status block.
        #[arg(long, default_value = "0", value_parser = parse_u32)]
        mailbox_base: u32,
    },
}

fn parse_u64(s: &str) -> Result<u64, String> {
    parse_int_literal(s).ok_or_else(|| format!("not an integer: {s}"))
}

fn parse_u32(s: &str) -> Result<u32, String> {
    let v = parse_u64(s)?;
    u32::try_from(v).map_err(|_| format!("{s} does not fit in 32 bits"))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| default_level.into()),
        )
        .init();

    match cli.command {
        Cmd::Bridge {
            port,
            mailbox_base,
            timeout_ms,
            no_check_replies,
            rpc_bind,
        } => {
            let config = BridgeConfig {
                layout: MailboxLayout {
                    base: mailbox_base,
                    ..MailboxLayout::default()
                },
                completion_timeout: Duration::from_millis(timeout_ms),
                check_replies: !no_check_replies,
                ..BridgeConfig::default()
            };
            cmd_bridge(&cli.window, port, config, rpc_bind)?;
        }
        Cmd::HalServer { bind } => cmd_hal_server(&cli.window, bind)?,
        Cmd::Read(target) => cmd_read(&cli.window, &target)?,
        Cmd::Write { target, value } => cmd_write(&cli.window, &target, value)?,
        Cmd::MailboxStatus { mailbox_base } => cmd_mailbox_status(&cli.window, mailbox_base)?,
    }

    Ok(())
}

type Hardware = Arc<RegisterAccess<Box<dyn WordSpace>>>;

fn open_window(args: &WindowArgs) -> Result<Hardware> {
    let window = MemoryWindow {
        base: args.base,
        len_words: usize::try_from(args.len / 4).context("window length too large")?,
    };
    let selection = if args.software {
        BackendSelection::Software
    } else {
        BackendSelection::Mmap
    };
    let space = open_backend(selection, window)
        .with_context(|| format!("opening AXI window at {:#x}", window.base))?;
    info!(
        "AXI window {:#x}+{:#x} via {}",
        window.base,
        window.len_bytes(),
        space.backend_type()
    );
    Ok(Arc::new(RegisterAccess::new(space)))
}

fn cmd_bridge(
    window: &WindowArgs,
    port: u16,
    config: BridgeConfig,
    rpc_bind: Option<SocketAddr>,
) -> Result<()> {
    let hw = open_window(window)?;

    if let Some(bind) = rpc_bind {
        let server_hw = Arc::clone(&hw);
        thread::Builder::new()
            .name("hermes-rpc-accept".into())
            .spawn(move || {
                if let Err(e) = hermes_driver::rpc::server::serve(server_hw, &ServerConfig { bind }) {
                    tracing::error!("Register server stopped: {e}");
                }
            })?;
    }

    let socket = UdpSocket::bind(("0.0.0.0", port))
        .with_context(|| format!("binding UDP port {port}"))?;
    let mut bridge = MailboxBridge::new(hw, config);
    let status = bridge.status()?;
    info!(?status, backend = %bridge.hardware().backend_type(), "Mailbox ready");
    bridge.run(&socket)?;
    Ok(())
}

fn cmd_hal_server(window: &WindowArgs, bind: SocketAddr) -> Result<()> {
    let hw = open_window(window)?;
    hermes_driver::rpc::server::serve(hw, &ServerConfig { bind })
        .with_context(|| format!("serving on {bind}"))?;
    Ok(())
}

fn resolve_target(target: &TargetArgs) -> Result<Register> {
    if let Some(addr) = parse_int_literal(&target.reg) {
        let addr = u32::try_from(addr).context("address does not fit in 32 bits")?;
        return Register::new(addr, target.mask).context("mask must not be zero");
    }
    let Some(path) = &target.map else {
        bail!("{} is not an address; pass --map to look up names", target.reg);
    };
    Ok(RegisterMap::load(path)?.resolve(&target.reg)?)
}

fn bus_for(window: &WindowArgs, target: &TargetArgs) -> Result<Box<dyn RegisterBus>> {
    let bus: Box<dyn RegisterBus> = match &target.server {
        Some(server) => Box::new(RegisterClient::new(ClientConfig {
            server: server.clone(),
            reply_timeout: Duration::from_millis(target.timeout_ms),
        })),
        None => Box::new(open_window(window)?),
    };
    Ok(bus)
}

fn cmd_read(window: &WindowArgs, target: &TargetArgs) -> Result<()> {
    let reg = resolve_target(target)?;
    let bus = bus_for(window, target)?;
    let value = bus.read(reg.address(), reg.mask())?;
    if reg.mask() == FULL_MASK {
        println!("{:#010x} = {value:#010x}", reg.address());
    } else {
        println!("{:#010x} & {:#010x} = {value:#x}", reg.address(), reg.mask());
    }
    Ok(())
}

fn cmd_write(window: &WindowArgs, target: &TargetArgs, value: u32) -> Result<()> {
    let reg = resolve_target(target)?;
    if value > reg.max_value() {
        bail!(
            "value {value:#x} does not fit in a {}-bit field",
            reg.width()
        );
    }
    let bus = bus_for(window, target)?;
    bus.write(reg.address(), reg.mask(), value)?;
    println!("{:#010x} & {:#010x} <- {value:#x}", reg.address(), reg.mask());
    Ok(())
}

fn cmd_mailbox_status(window: &WindowArgs, mailbox_base: u32) -> Result<()> {
    let hw = open_window(window)?;
    let layout = MailboxLayout {
        base: mailbox_base,
        ..MailboxLayout::default()
    };
    let bridge = MailboxBridge::new(
        hw,
        BridgeConfig {
            layout,
            ..BridgeConfig::default()
        },
    );
    let s = bridge.status()?;
    println!("num_buffers       : {}", s.num_buffers);
    println!("words_per_page    : {}", s.words_per_page);
    println!("next_request_page : {}", s.next_request_page);
    println!("num_replies       : {}", s.num_replies);
    println!("page capacity     : {} words", s.page_capacity());
    match (s.request_base(&layout), s.reply_base(&layout)) {
        (Some(req), Some(rep)) => println!("request / reply   : {req:#x} / {rep:#x}"),
        _ => println!("request / reply   : (outside 32-bit space)"),
    }
    Ok(())
}
