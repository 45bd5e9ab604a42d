//! Wire-level definitions of the High-Level Debug Protocol (HLDP).
//!
//! Everything on the wire is a little-endian binary packet behind a fixed
//! 8-byte header. There are no per-message ids, checksums or compression;
//! requests are answered strictly in order over the single connection.

pub mod codec;
pub mod transport;

use strum_macros::FromRepr;

/// Zero-terminated banner written to the client right after accept.
pub const BANNER: &[u8] = b"Sysprogs High-Level Debug Protocol\0";

pub const PROTOCOL_VERSION: i32 = 1;

/// Operator string the client uses to build fully qualified sub-expression
/// paths, so the server never parses expression syntax itself.
pub const SUBEXPRESSION_DELIMITER: &str = "$->";

/// All HLDP packet types. `Sc` variants are server-to-client packets, `Cs`
/// stands for client-to-server. The numeric values are the wire encoding
/// and must not be reordered.
#[derive(FromRepr, Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum PacketType {
    Invalid,
    /// Payload: details:string.
    ScError,
    /// Payload: version:int32, subexpression delimiter:string.
    ScHandshake,
    /// No payload.
    CsHandshake,

    /// Payload: reason:int32, int param:int32, string param:string,
    /// array of backtrace entries.
    ScTargetStopped,
    /// No payload.
    ScTargetRunning,

    // No payload for the flow control packets.
    CsContinue,
    CsStepIn,
    CsStepOut,
    CsStepOver,
    /// Asks a running target to stop at the next statement.
    CsBreakIn,

    /// Payload: file:string, one-based line:int32. Treated as a flow control
    /// verb, i.e. replied with scTargetRunning followed by scTargetStopped.
    CsSetNextStatement,

    CsTerminate,
    CsDetach,

    // Expression packets are only valid while the target is stopped; a
    // resume or step invalidates every expression handle at once.
    /// Payload: frame id:int32, expression text:string.
    CsCreateExpression,
    /// Payload: id:int32, name:string, type:string, value:string,
    /// flags:int32, child count:int32 (-1 = computed on first query).
    ScExpressionCreated,
    /// Payload: id:int32.
    CsQueryExpressionChildren,
    /// Payload: array of the same shape as scExpressionCreated.
    ScExpressionChildrenQueried,
    /// Payload: id:int32, value:string.
    CsSetExpressionValue,
    /// No payload.
    ScExpressionUpdated,

    // Breakpoint packets can be executed without stopping the target. The
    // two bracket values delimit the range tested by is_breakpoint_command.
    BeforeFirstBreakpointCommand,
    /// Payload: file:string, one-based line:int32.
    CsCreateBreakpoint,
    /// Payload: function name:string.
    CsCreateFunctionBreakpoint,
    /// Payload: kind:int32, string arg:string, reserved:int32.
    CsCreateDomainSpecificBreakpoint,
    /// Payload: breakpoint id:int32.
    ScBreakpointCreated,
    /// Payload: breakpoint id:int32.
    CsDeleteBreakpoint,
    /// Payload: id:int32, field:int32, int arg 1:int32, int arg 2:int32,
    /// string arg:string.
    CsUpdateBreakpoint,
    /// Reserved, currently rejected with scError.
    CsQueryBreakpoint,
    /// Reserved.
    ScBreakpointQueried,
    /// No payload. Reply to csDeleteBreakpoint and csUpdateBreakpoint.
    ScBreakpointUpdated,
    AfterLastBreakpointCommand,

    /// Payload: stream:int32, text:string.
    ScDebugMessage,
    /// Payload: exit code:int32.
    ScTargetExited,
}

impl PacketType {
    /// Whether this request belongs to the breakpoint-management range,
    /// serviced both while the target runs and while it is stopped.
    pub fn is_breakpoint_command(self) -> bool {
        (self as u32) > (PacketType::BeforeFirstBreakpointCommand as u32)
            && (self as u32) < (PacketType::AfterLastBreakpointCommand as u32)
    }
}

/// Reason codes carried by scTargetStopped.
#[derive(FromRepr, Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum StopReason {
    InitialBreakIn,
    /// Int param carries the breakpoint id.
    Breakpoint,
    BreakInRequested,
    StepComplete,
    UnspecifiedEvent,
    Exception,
    SetNextStatement,
}

/// Breakpoint fields addressable by csUpdateBreakpoint.
#[derive(FromRepr, Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum BreakpointField {
    /// Int arg 1 carries the enabled flag.
    IsEnabled,
}

/// Wire encoding of the csCreateDomainSpecificBreakpoint kind argument.
#[derive(FromRepr, Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum DomainSpecificKind {
    VariableAccessed,
    VariableUpdated,
    MessageSent,
    TargetCreated,
}
