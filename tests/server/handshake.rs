use crate::common::{Interpreter, Project, Script, nop, start_session, start_session_raw};
use hldp::protocol::{PacketType, StopReason};

#[test]
fn handshake_and_initial_stop() {
    let interpreter = Interpreter::new(Project::with_files(&["build.script"]));
    let script = Script {
        file: "build.script",
        statements: vec![nop("project", 1), nop("set", 2)],
    };
    let (session, mut client) = start_session(interpreter, script);

    // The banner and scHandshake{1, "$->"} are verified inside connect.
    let stop = client.expect_stopped();
    assert_eq!(stop.reason, StopReason::InitialBreakIn);
    assert_eq!(stop.int_param, 0);
    assert_eq!(stop.string_param, "");
    assert_eq!(stop.frames.len(), 1);
    assert_eq!(stop.frames[0].id, 0);
    assert_eq!(stop.frames[0].function, "");
    assert_eq!(stop.frames[0].arguments, "");
    assert_eq!(stop.frames[0].file, "/proj/build.script");
    assert_eq!(stop.frames[0].line, 1);

    client.continue_target();
    assert_eq!(client.expect_exited(), 0);
    session.finish();
}

#[test]
fn unexpected_packet_instead_of_handshake_aborts_session() {
    let interpreter = Interpreter::new(Project::with_files(&["build.script"]));
    let script = Script {
        file: "build.script",
        statements: vec![nop("project", 1)],
    };
    let (session, mut client) = start_session_raw(interpreter, script);

    client.send_empty(PacketType::CsContinue);

    // The server refuses to run the script and tears the session down.
    let (packet, _) = client.receive_any().expect("teardown packet");
    assert_eq!(packet, PacketType::ScTargetExited);
    assert!(client.receive_any().is_err());
    session.finish();
}
