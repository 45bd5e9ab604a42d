use crate::common::{Interpreter, Project, Script, nop, start_session};
use hldp::protocol::{PacketType, StopReason};

fn plain_script(lines: &[i32]) -> Script {
    Script {
        file: "build.script",
        statements: lines.iter().map(|line| nop("set", *line)).collect(),
    }
}

#[test]
fn line_breakpoint_hit_and_continue() {
    let interpreter = Interpreter::new(Project::with_files(&["build.script"]));
    let (session, mut client) = start_session(interpreter, plain_script(&[1, 5, 10, 12]));

    let stop = client.expect_stopped();
    assert_eq!(stop.reason, StopReason::InitialBreakIn);

    let id = client.create_line_breakpoint("build.script", 10);
    assert!(id >= 1);
    client.continue_target();

    let stop = client.expect_stopped();
    assert_eq!(stop.reason, StopReason::Breakpoint);
    assert_eq!(stop.int_param, id);
    assert_eq!(stop.string_param, "");
    assert_eq!(stop.frames.len(), 1);
    assert_eq!(stop.frames[0].line, 10);

    client.continue_target();
    assert_eq!(client.expect_exited(), 0);
    session.finish();
}

#[test]
fn breakpoint_on_missing_file_is_rejected() {
    let interpreter = Interpreter::new(Project::with_files(&["build.script"]));
    let (session, mut client) = start_session(interpreter, plain_script(&[1]));

    client.expect_stopped();
    let error = client
        .try_create_line_breakpoint("missing.script", 3)
        .unwrap_err();
    assert!(error.contains("missing.script"), "got {error:?}");

    client.continue_target();
    client.expect_exited();
    session.finish();
}

#[test]
fn function_breakpoint_matches_case_insensitively() {
    let interpreter = Interpreter::new(Project::with_files(&["build.script"]));
    let script = Script {
        file: "build.script",
        statements: vec![nop("project", 1), nop("Compile_Project", 4), nop("set", 5)],
    };
    let (session, mut client) = start_session(interpreter, script);

    client.expect_stopped();
    let id = client.create_function_breakpoint("compile_project");
    client.continue_target();

    let stop = client.expect_stopped();
    assert_eq!(stop.reason, StopReason::Breakpoint);
    assert_eq!(stop.int_param, id);
    assert_eq!(stop.frames[0].line, 4);

    client.continue_target();
    client.expect_exited();
    session.finish();
}

#[test]
fn location_breakpoint_takes_precedence_over_function() {
    let interpreter = Interpreter::new(Project::with_files(&["build.script"]));
    let script = Script {
        file: "build.script",
        statements: vec![nop("project", 1), nop("build_step", 6)],
    };
    let (session, mut client) = start_session(interpreter, script);

    client.expect_stopped();
    let function_id = client.create_function_breakpoint("build_step");
    let location_id = client.create_line_breakpoint("build.script", 6);
    assert!(location_id > function_id);
    client.continue_target();

    let stop = client.expect_stopped();
    assert_eq!(stop.reason, StopReason::Breakpoint);
    assert_eq!(stop.int_param, location_id);

    client.continue_target();
    client.expect_exited();
    session.finish();
}

#[test]
fn disabled_breakpoint_is_skipped_until_reenabled() {
    let interpreter = Interpreter::new(Project::with_files(&["build.script"]));
    let (session, mut client) = start_session(interpreter, plain_script(&[1, 8, 9]));

    client.expect_stopped();
    let id = client.create_line_breakpoint("build.script", 8);
    client.set_breakpoint_enabled(id, false);

    let second = client.create_line_breakpoint("build.script", 9);
    client.set_breakpoint_enabled(second, false);
    client.set_breakpoint_enabled(second, true);

    client.continue_target();
    // Line 8 passes silently, line 9 hits again.
    let stop = client.expect_stopped();
    assert_eq!(stop.int_param, second);
    assert_eq!(stop.frames[0].line, 9);

    client.continue_target();
    client.expect_exited();
    session.finish();
}

#[test]
fn updating_unknown_breakpoint_reports_an_error() {
    let interpreter = Interpreter::new(Project::with_files(&["build.script"]));
    let (session, mut client) = start_session(interpreter, plain_script(&[1]));

    client.expect_stopped();
    let mut builder = hldp::protocol::codec::ReplyBuilder::new();
    builder.append_i32(999);
    builder.append_i32(0);
    builder.append_i32(1);
    builder.append_i32(0);
    builder.append_string("");
    client.send(PacketType::CsUpdateBreakpoint, &builder);
    let error = client.expect_error();
    assert!(error.contains("Could not find a breakpoint"), "got {error:?}");

    client.continue_target();
    client.expect_exited();
    session.finish();
}

#[test]
fn deleted_breakpoint_no_longer_hits() {
    let interpreter = Interpreter::new(Project::with_files(&["build.script"]));
    let (session, mut client) = start_session(interpreter, plain_script(&[1, 7]));

    client.expect_stopped();
    let id = client.create_line_breakpoint("build.script", 7);
    client.delete_breakpoint(id);
    client.continue_target();

    client.expect_exited();
    session.finish();
}

#[test]
fn break_in_stops_a_running_target() {
    let interpreter = Interpreter::new(Project::with_files(&["build.script"]));
    let lines: Vec<i32> = (1..=50_000).collect();
    let (session, mut client) = start_session(interpreter, plain_script(&lines));

    client.expect_stopped();
    client.continue_target();
    client.send_empty(PacketType::CsBreakIn);

    let stop = client.expect_stopped();
    assert_eq!(stop.reason, StopReason::BreakInRequested);

    client.continue_target();
    client.expect_exited();
    session.finish();
}

#[test]
fn breakpoints_can_be_managed_while_running() {
    let interpreter = Interpreter::new(Project::with_files(&["build.script"]));
    let lines: Vec<i32> = (1..=50_000).collect();
    let (session, mut client) = start_session(interpreter, plain_script(&lines));

    client.expect_stopped();
    client.continue_target();

    // Serviced by the per-statement poll without stopping the target.
    let id = client.create_line_breakpoint("build.script", 40_000);
    let stop = client.expect_stopped();
    assert_eq!(stop.reason, StopReason::Breakpoint);
    assert_eq!(stop.int_param, id);
    assert_eq!(stop.frames[0].line, 40_000);

    client.continue_target();
    client.expect_exited();
    session.finish();
}

#[test]
fn break_in_while_stopped_is_ignored() {
    let interpreter = Interpreter::new(Project::with_files(&["build.script"]));
    let (session, mut client) = start_session(interpreter, plain_script(&[1, 2]));

    client.expect_stopped();
    client.send_empty(PacketType::CsBreakIn);
    // No reply, no new stop reason; the target resumes normally.
    client.continue_target();
    client.expect_exited();
    session.finish();
}
