//! Interactive client for HLDP debug servers.
//!
//! Connects to a debugged interpreter, completes the handshake and maps
//! line commands onto protocol packets. Intended for poking a live server
//! without a GUI; type `help` at the prompt for the command list.

use anyhow::{Context, bail};
use clap::Parser;
use hldp::protocol::codec::{ReplyBuilder, RequestReader};
use hldp::protocol::{BANNER, PacketType, StopReason};
use std::io::{BufRead, Read, Write};
use std::net::TcpStream;
use std::thread;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address the debugged interpreter listens on.
    #[clap(long, default_value = "127.0.0.1")]
    host: String,

    /// TCP port of the debug server.
    #[clap(short, long)]
    port: u16,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let mut stream = TcpStream::connect((args.host.as_str(), args.port))
        .with_context(|| format!("connect to {}:{}", args.host, args.port))?;

    let mut banner = vec![0u8; BANNER.len()];
    stream.read_exact(&mut banner).context("read banner")?;
    if banner != BANNER {
        bail!("unexpected banner, not an HLDP server");
    }
    println!(
        "{}",
        String::from_utf8_lossy(&banner[..banner.len() - 1])
    );

    let mut reader = RequestReader::default();
    let packet = receive(&mut stream, &mut reader)?;
    if packet != PacketType::ScHandshake {
        bail!("expected scHandshake, got {packet:?}");
    }
    let version = reader.read_i32()?;
    let delimiter = reader.read_string()?;
    println!("protocol version {version}, subexpression delimiter {delimiter:?}");
    send(&mut stream, PacketType::CsHandshake, &ReplyBuilder::new())?;

    let printer_stream = stream.try_clone().context("clone stream")?;
    thread::spawn(move || {
        if let Err(e) = print_incoming(printer_stream) {
            log::debug!("server connection closed: {e:#}");
            println!("(connection closed)");
            std::process::exit(0);
        }
    });

    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        match build_request(&line) {
            Ok(Some((packet, builder))) => send(&mut stream, packet, &builder)?,
            Ok(None) => {}
            Err(e) => println!("{e:#}"),
        }
    }
    Ok(())
}

/// Decode and pretty-print every server packet as it arrives.
fn print_incoming(mut stream: TcpStream) -> anyhow::Result<()> {
    let mut reader = RequestReader::default();
    loop {
        let packet = receive(&mut stream, &mut reader)?;
        match packet {
            PacketType::ScTargetStopped => {
                let reason = reader.read_i32()?;
                let int_param = reader.read_i32()?;
                let string_param = reader.read_string()?;
                let reason = StopReason::from_repr(reason)
                    .map(|r| format!("{r:?}"))
                    .unwrap_or_else(|| format!("reason {reason}"));
                println!("stopped: {reason}, int {int_param}, string {string_param:?}");
                let frames = reader.read_i32()?;
                for _ in 0..frames {
                    let id = reader.read_i32()?;
                    let function = reader.read_string()?;
                    let arguments = reader.read_string()?;
                    let file = reader.read_string()?;
                    let line = reader.read_i32()?;
                    println!("  #{id} {function}({arguments}) at {file}:{line}");
                }
            }
            PacketType::ScTargetRunning => println!("running"),
            PacketType::ScTargetExited => {
                println!("target exited with code {}", reader.read_i32()?);
            }
            PacketType::ScDebugMessage => {
                let stream_id = reader.read_i32()?;
                println!("message[{stream_id}]: {}", reader.read_string()?);
            }
            PacketType::ScError => println!("error: {}", reader.read_string()?),
            PacketType::ScBreakpointCreated => {
                println!("breakpoint {} created", reader.read_i32()?);
            }
            PacketType::ScBreakpointUpdated => println!("breakpoint updated"),
            PacketType::ScExpressionCreated => {
                print_expression(&mut reader)?;
            }
            PacketType::ScExpressionChildrenQueried => {
                let count = reader.read_i32()?;
                for _ in 0..count {
                    print_expression(&mut reader)?;
                }
            }
            PacketType::ScExpressionUpdated => println!("expression updated"),
            other => println!("unhandled packet {other:?}"),
        }
    }
}

fn print_expression(reader: &mut RequestReader) -> anyhow::Result<()> {
    let id = reader.read_i32()?;
    let name = reader.read_string()?;
    let type_label = reader.read_string()?;
    let value = reader.read_string()?;
    let _flags = reader.read_i32()?;
    let children = reader.read_i32()?;
    println!("  expression #{id} {name} {type_label} = {value:?}, {children} children");
    Ok(())
}

/// Map one command line onto a request packet. `Ok(None)` means nothing to
/// send (empty line, help).
fn build_request(line: &str) -> anyhow::Result<Option<(PacketType, ReplyBuilder)>> {
    let line = line.trim();
    let mut words = line.split_whitespace();
    let Some(command) = words.next() else {
        return Ok(None);
    };
    let rest = line[command.len()..].trim_start();
    let mut builder = ReplyBuilder::new();

    let packet = match command {
        "help" => {
            println!(
                "c (continue), si (step in), so (step out), sv (step over), bi (break in)\n\
                 b <file>:<line>, bf <function>, bd <kind> [arg], del <id>, en <id>, dis <id>\n\
                 n <file>:<line> (set next statement)\n\
                 e <frame> <text>, ch <id>, set <id> <value>\n\
                 detach, kill"
            );
            return Ok(None);
        }
        "c" => PacketType::CsContinue,
        "si" => PacketType::CsStepIn,
        "so" => PacketType::CsStepOut,
        "sv" => PacketType::CsStepOver,
        "bi" => PacketType::CsBreakIn,
        "detach" => PacketType::CsDetach,
        "kill" => PacketType::CsTerminate,
        "b" | "n" => {
            let (file, line_no) = rest
                .rsplit_once(':')
                .context("expected <file>:<line>")?;
            builder.append_string(file);
            builder.append_i32(line_no.trim().parse().context("line must be a number")?);
            if command == "b" {
                PacketType::CsCreateBreakpoint
            } else {
                PacketType::CsSetNextStatement
            }
        }
        "bf" => {
            builder.append_string(rest);
            PacketType::CsCreateFunctionBreakpoint
        }
        "bd" => {
            let kind = words.next().context("expected <kind> [arg]")?;
            let argument = words.next().unwrap_or("");
            builder.append_i32(kind.parse().context("kind must be a number")?);
            builder.append_string(argument);
            builder.append_i32(0);
            PacketType::CsCreateDomainSpecificBreakpoint
        }
        "del" => {
            builder.append_i32(rest.parse().context("expected breakpoint id")?);
            PacketType::CsDeleteBreakpoint
        }
        "en" | "dis" => {
            builder.append_i32(rest.parse().context("expected breakpoint id")?);
            builder.append_i32(0); // field: IsEnabled
            builder.append_i32((command == "en") as i32);
            builder.append_i32(0);
            builder.append_string("");
            PacketType::CsUpdateBreakpoint
        }
        "e" => {
            let frame = words.next().context("expected <frame> <text>")?;
            let text = words.next().context("expected <frame> <text>")?;
            builder.append_i32(frame.parse().context("frame must be a number")?);
            builder.append_string(text);
            PacketType::CsCreateExpression
        }
        "ch" => {
            builder.append_i32(rest.parse().context("expected expression id")?);
            PacketType::CsQueryExpressionChildren
        }
        "set" => {
            let id = words.next().context("expected <id> <value>")?;
            let value = words.next().context("expected <id> <value>")?;
            builder.append_i32(id.parse().context("id must be a number")?);
            builder.append_string(value);
            PacketType::CsSetExpressionValue
        }
        other => bail!("unknown command {other:?}, try help"),
    };
    Ok(Some((packet, builder)))
}

fn send(stream: &mut TcpStream, packet: PacketType, builder: &ReplyBuilder) -> anyhow::Result<()> {
    let payload = builder.as_bytes();
    let mut header = [0u8; 8];
    header[..4].copy_from_slice(&(packet as u32).to_le_bytes());
    header[4..].copy_from_slice(&(payload.len() as u32).to_le_bytes());
    stream.write_all(&header)?;
    stream.write_all(payload)?;
    Ok(())
}

fn receive(stream: &mut TcpStream, reader: &mut RequestReader) -> anyhow::Result<PacketType> {
    let mut header = [0u8; 8];
    stream.read_exact(&mut header)?;
    let raw_type = u32::from_le_bytes(header[..4].try_into().expect("infallible"));
    let payload_size = u32::from_le_bytes(header[4..].try_into().expect("infallible"));
    let payload = reader.reset(payload_size as usize);
    if !payload.is_empty() {
        stream.read_exact(payload)?;
    }
    PacketType::from_repr(raw_type).with_context(|| format!("unknown packet type {raw_type}"))
}
