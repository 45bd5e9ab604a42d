//! The debug server embedded into the script interpreter.
//!
//! The interpreter calls [`HldpServer::on_statement`] before executing each
//! statement and keeps the returned [`StatementScope`] alive for the
//! statement's duration; the server decides whether to run freely, service
//! a client request, stop, skip the statement or divert execution to
//! another line. Message, variable-access and target-creation events are
//! reported through the hook methods and may stop the target the same way.
//!
//! Everything is single-threaded and cooperative: while the target is
//! stopped the server blocks the interpreter inside the request loop until
//! the client sends a flow-control verb.

pub mod breakpoint;
pub mod expression;
pub mod scope;

use crate::error::Error;
use crate::host::{FunctionCall, MessageKind, ScriptHost, VariableAccess};
use crate::protocol::codec::{ReplyBuilder, RequestReader};
use crate::protocol::transport::DebugTransport;
use crate::protocol::{
    BANNER, BreakpointField, DomainSpecificKind, PROTOCOL_VERSION, PacketType, StopReason,
    SUBEXPRESSION_DELIMITER,
};
use crate::weak_error;
use crate::server::breakpoint::{
    BreakpointManager, CaseInsensitiveName, DomainSpecificBreakpoint, INVALID_BREAKPOINT_ID,
};
use crate::server::expression::{Expression, ExpressionCache};
use crate::server::scope::{NO_SCOPE, ROOT_SCOPE, ScopeEntry, ScopeId};
use itertools::Itertools;
use std::cell::{Cell, RefCell};
use std::collections::BTreeSet;

pub use crate::server::scope::StatementScope;

pub struct HldpServer {
    transport: RefCell<DebugTransport>,
    breakpoints: RefCell<BreakpointManager>,
    call_stack: RefCell<Vec<ScopeEntry>>,
    expressions: RefCell<ExpressionCache>,
    /// Names that ever had a variable watch created, so the variable hook
    /// can reject unwatched accesses without consulting the breakpoints.
    watched_variables: RefCell<BTreeSet<CaseInsensitiveName>>,

    next_scope_id: Cell<ScopeId>,
    end_of_step_scope: Cell<ScopeId>,
    break_in_pending: Cell<bool>,
    /// One-based target line of a pending set-next-statement, 0 when none.
    next_line_to_execute: Cell<i32>,
    events_reported: Cell<bool>,
    detached: Cell<bool>,
    serving: Cell<bool>,
    failed: Cell<bool>,
}

impl HldpServer {
    /// Start listening on `port` (0 requests an ephemeral port). The client
    /// is not accepted until [`HldpServer::wait_for_client`].
    pub fn new(port: u16) -> Result<Self, Error> {
        Ok(Self {
            transport: RefCell::new(DebugTransport::bind(port)?),
            breakpoints: RefCell::new(BreakpointManager::default()),
            call_stack: RefCell::new(Vec::new()),
            expressions: RefCell::new(ExpressionCache::default()),
            watched_variables: RefCell::new(BTreeSet::new()),
            next_scope_id: Cell::new(0),
            end_of_step_scope: Cell::new(NO_SCOPE),
            // The first executed statement always reports a stop.
            break_in_pending: Cell::new(true),
            next_line_to_execute: Cell::new(0),
            events_reported: Cell::new(false),
            detached: Cell::new(false),
            serving: Cell::new(false),
            failed: Cell::new(false),
        })
    }

    pub fn local_port(&self) -> Result<u16, Error> {
        self.transport.borrow().local_port()
    }

    /// Block until a client connects and completes the banner + handshake
    /// exchange. Any deviation from the expected sequence fails the
    /// session.
    pub fn wait_for_client(&self) -> Result<(), Error> {
        let result = self.handshake();
        if let Err(e) = &result {
            log::error!(target: "hldp", "failed to establish a debug session: {e:#}");
            self.failed.set(true);
        }
        result
    }

    fn handshake(&self) -> Result<(), Error> {
        let mut transport = self.transport.borrow_mut();
        transport.accept()?;
        transport.write_raw(BANNER)?;

        let mut builder = ReplyBuilder::new();
        builder.append_i32(PROTOCOL_VERSION);
        builder.append_string(SUBEXPRESSION_DELIMITER);
        transport.send(PacketType::ScHandshake, builder.as_bytes())?;

        let mut reader = RequestReader::default();
        match transport.receive(&mut reader) {
            Ok(PacketType::CsHandshake) => Ok(()),
            Ok(_) => Err(Error::Handshake("unexpected packet in place of csHandshake")),
            Err(e) => Err(e),
        }
    }

    pub fn is_failed(&self) -> bool {
        self.failed.get()
    }

    /// Per-statement hook. Returns the scope guard to hold for the
    /// statement's duration, or `None` when the statement should execute
    /// without a tracked scope (detached session, aborted tick).
    ///
    /// `skip_this_instruction` is set when the client diverted execution;
    /// the interpreter must then skip the statement and consult
    /// [`HldpServer::adjust_next_executed_function`].
    pub fn on_statement<'a>(
        &'a self,
        host: &dyn ScriptHost,
        function: &FunctionCall,
        skip_this_instruction: &mut bool,
    ) -> Option<StatementScope<'a>> {
        *skip_this_instruction = false;
        if self.detached.get() || self.failed.get() {
            return None;
        }

        let scope = self.enter_scope(host, function);

        let mut reason = StopReason::UnspecifiedEvent;
        let mut int_param = 0;
        let string_param = String::new();

        {
            let stack = self.call_stack.borrow();
            let top = stack.last().expect("scope just pushed");
            let mut breakpoints = self.breakpoints.borrow_mut();
            // A location breakpoint takes precedence; function breakpoints
            // are consulted only when no location breakpoint matched here.
            let mut hit = breakpoints
                .try_get_at_location(host, &top.source_file, function.line)
                .map(|bp| (bp.id, bp.enabled));
            if hit.is_none() {
                hit = breakpoints
                    .try_get_for_function(&function.name)
                    .map(|bp| (bp.id, bp.enabled));
            }
            if let Some((id, enabled)) = hit {
                if enabled {
                    self.break_in_pending.set(true);
                    reason = StopReason::Breakpoint;
                    int_param = id;
                }
            }
        }

        let parent_scope = {
            let stack = self.call_stack.borrow();
            if stack.len() >= 2 {
                stack[stack.len() - 2].id
            } else {
                ROOT_SCOPE
            }
        };
        if parent_scope == self.end_of_step_scope.get() {
            self.break_in_pending.set(true);
            if reason == StopReason::UnspecifiedEvent {
                reason = StopReason::StepComplete;
            }
        }

        if !self.break_in_pending.get() {
            if !self.transport.borrow().has_incoming_data() {
                return Some(scope);
            }

            let mut reader = RequestReader::default();
            match self.receive_request(host, &mut reader) {
                Ok(PacketType::CsBreakIn) => {
                    self.break_in_pending.set(true);
                    reason = StopReason::BreakInRequested;
                }
                Ok(ty) if ty.is_breakpoint_command() => {
                    self.handle_breakpoint_command(host, ty, &mut reader);
                    return None;
                }
                Ok(_) | Err(Error::UnknownPacket(_)) => {
                    self.send_error_packet(
                        host,
                        "Unexpected packet received while the target is running",
                    );
                    return None;
                }
                Err(_) => return None,
            }
        }

        if self.next_line_to_execute.get() != 0 && reason == StopReason::UnspecifiedEvent {
            reason = StopReason::SetNextStatement;
        }
        if !self.events_reported.get() {
            if reason == StopReason::UnspecifiedEvent {
                reason = StopReason::InitialBreakIn;
            }
            self.events_reported.set(true);
        }

        self.report_stop_and_serve(
            host,
            reason,
            int_param,
            &string_param,
            Some(skip_this_instruction),
        );
        Some(scope)
    }

    /// Redirect the interpreter's statement loop after a skipped
    /// instruction. `next_index` is set to the index of the first statement
    /// whose line is at or past the requested one; it is left unchanged
    /// when no statement qualifies or no redirect is pending. The caller
    /// resumes its loop at `next_index` without incrementing.
    pub fn adjust_next_executed_function(
        &self,
        statements: &[FunctionCall],
        next_index: &mut usize,
    ) {
        let line = self.next_line_to_execute.get();
        if line == 0 {
            return;
        }
        if let Some(index) = statements.iter().position(|f| f.line >= line) {
            *next_index = index;
        }
    }

    // ------------------------------------ event hooks --------------------------------------------

    /// Report a message produced by the interpreter. Fatal message classes
    /// stop the target with an `Exception`; other messages stop it when a
    /// message breakpoint's substring matches.
    pub fn on_message(&self, host: &dyn ScriptHost, kind: MessageKind, text: &str) {
        if !self.hooks_active() {
            return;
        }

        let mut builder = ReplyBuilder::new();
        builder.append_i32(0);
        builder.append_string(text);
        if !self.send_reply(host, PacketType::ScDebugMessage, &builder) {
            return;
        }

        if kind.is_fatal_class() {
            self.report_stop_and_serve(host, StopReason::Exception, 0, text, None);
            return;
        }

        let id = self.breakpoints.borrow().find_enabled_domain_specific(|ext| {
            matches!(ext, DomainSpecificBreakpoint::MessageSent(substring) if text.contains(substring.as_str()))
        });
        if id != INVALID_BREAKPOINT_ID {
            self.report_stop_and_serve(host, StopReason::Breakpoint, id, text, None);
        }
    }

    /// Report a variable access. Only names that ever had a watch created
    /// get past the first check, keeping the common path cheap.
    pub fn on_variable_access(&self, host: &dyn ScriptHost, name: &str, access: VariableAccess) {
        if !self.hooks_active() {
            return;
        }
        if !self
            .watched_variables
            .borrow()
            .contains(&CaseInsensitiveName::new(name))
        {
            return;
        }

        let id = self
            .breakpoints
            .borrow()
            .find_enabled_domain_specific(|ext| match (access, ext) {
                (VariableAccess::Read, DomainSpecificBreakpoint::VariableAccessed(watched))
                | (VariableAccess::Write, DomainSpecificBreakpoint::VariableUpdated(watched)) => {
                    watched.eq_ignore_ascii_case(name)
                }
                _ => false,
            });
        if id != INVALID_BREAKPOINT_ID {
            self.report_stop_and_serve(host, StopReason::Breakpoint, id, "", None);
        }
    }

    /// Report a created build target.
    pub fn on_target_created(&self, host: &dyn ScriptHost, name: &str) {
        if !self.hooks_active() {
            return;
        }

        let id = self.breakpoints.borrow().find_enabled_domain_specific(|ext| {
            matches!(ext, DomainSpecificBreakpoint::TargetCreated(watched)
                if watched.is_empty() || watched == name)
        });
        if id != INVALID_BREAKPOINT_ID {
            self.report_stop_and_serve(host, StopReason::Breakpoint, id, name, None);
        }
    }

    fn hooks_active(&self) -> bool {
        !self.detached.get() && !self.failed.get() && self.transport.borrow().is_connected()
    }

    // ------------------------------------ scope tracking -----------------------------------------

    fn enter_scope<'a>(
        &'a self,
        host: &dyn ScriptHost,
        function: &FunctionCall,
    ) -> StatementScope<'a> {
        let id = self.next_scope_id.get();
        self.next_scope_id.set(id + 1);
        self.call_stack.borrow_mut().push(ScopeEntry {
            id,
            source_file: host.current_source_file(),
            function: function.clone(),
            position: host.current_position(),
        });
        StatementScope::new(self, id)
    }

    pub(crate) fn exit_scope(&self, id: ScopeId) {
        {
            let mut stack = self.call_stack.borrow_mut();
            match stack.last() {
                Some(top) if top.id == id => {
                    stack.pop();
                }
                _ => {
                    log::error!(target: "hldp", "{}", Error::ScopeImbalance);
                    self.failed.set(true);
                    return;
                }
            }
        }

        if id == self.end_of_step_scope.get() {
            // Stepping out of the scope where we were supposed to stop.
            self.break_in_pending.set(true);
        }
    }

    // ------------------------------------ stop-and-serve -----------------------------------------

    fn report_stop_and_serve(
        &self,
        host: &dyn ScriptHost,
        reason: StopReason,
        int_param: i32,
        string_param: &str,
        mut skip_this_instruction: Option<&mut bool>,
    ) {
        // A stop raised while another stop is being served (e.g. a fatal
        // message produced during expression evaluation) must not nest
        // another request loop; the in-flight one completes first.
        if self.serving.get() || self.failed.get() {
            return;
        }
        self.serving.set(true);

        self.break_in_pending.set(false);
        self.end_of_step_scope.set(NO_SCOPE);
        self.next_line_to_execute.set(0);

        let mut builder = ReplyBuilder::new();
        builder.append_i32(reason as i32);
        builder.append_i32(int_param);
        builder.append_string(string_param);
        let frame_count = builder.delayed_i32();
        {
            let stack = self.call_stack.borrow();
            for i in (0..stack.len()).rev() {
                let entry = &stack[i];
                builder.append_i32(i as i32);
                if i == 0 {
                    // The root frame executes the top-level file itself.
                    builder.append_string("");
                    builder.append_string("");
                } else {
                    let callee = &stack[i - 1].function;
                    builder.append_string(&callee.name);
                    builder.append_string(&callee.arguments.iter().join(", "));
                }
                builder.append_string(&entry.source_file);
                builder.append_i32(entry.function.line);
            }
            builder.store_i32(&frame_count, stack.len() as i32);
        }

        if !self.send_reply(host, PacketType::ScTargetStopped, &builder) {
            self.serving.set(false);
            return;
        }

        let mut reader = RequestReader::default();
        loop {
            builder.reset();
            let request = match self.receive_request(host, &mut reader) {
                Ok(ty) => ty,
                Err(Error::UnknownPacket(_)) => {
                    self.send_error_packet(
                        host,
                        "Unexpected packet received while the target is stopped",
                    );
                    continue;
                }
                Err(_) => break,
            };

            match request {
                // The target is already stopped.
                PacketType::CsBreakIn => continue,
                PacketType::CsContinue => {
                    self.end_of_step_scope.set(NO_SCOPE);
                    self.send_reply(host, PacketType::ScTargetRunning, &builder);
                    break;
                }
                PacketType::CsStepIn => {
                    self.break_in_pending.set(true);
                    self.send_reply(host, PacketType::ScTargetRunning, &builder);
                    break;
                }
                PacketType::CsStepOut => {
                    {
                        let stack = self.call_stack.borrow();
                        if stack.len() >= 3 {
                            self.end_of_step_scope.set(stack[stack.len() - 3].id);
                        } else if stack.len() == 2 {
                            self.end_of_step_scope.set(ROOT_SCOPE);
                        }
                    }
                    self.send_reply(host, PacketType::ScTargetRunning, &builder);
                    break;
                }
                PacketType::CsStepOver => {
                    {
                        let stack = self.call_stack.borrow();
                        if stack.len() >= 2 {
                            self.end_of_step_scope.set(stack[stack.len() - 2].id);
                        } else {
                            self.end_of_step_scope.set(ROOT_SCOPE);
                        }
                    }
                    self.send_reply(host, PacketType::ScTargetRunning, &builder);
                    break;
                }
                PacketType::CsSetNextStatement => {
                    let Some(skip) = skip_this_instruction.as_deref_mut() else {
                        self.send_error_packet(
                            host,
                            "Set next statement is not available for this stop",
                        );
                        continue;
                    };
                    let (file, line) = match (reader.read_string(), reader.read_i32()) {
                        (Ok(file), Ok(line)) => (file, line),
                        _ => {
                            self.send_error_packet(host, "Invalid set next statement request");
                            continue;
                        }
                    };
                    let current_file = {
                        let stack = self.call_stack.borrow();
                        match stack.last() {
                            Some(top) => top.source_file.clone(),
                            None => {
                                self.send_error_packet(host, "No statement is being executed");
                                continue;
                            }
                        }
                    };
                    let requested = host.real_path(&file);
                    if requested.is_empty()
                        || !requested.eq_ignore_ascii_case(&host.real_path(&current_file))
                    {
                        self.send_error_packet(
                            host,
                            "The next statement must be in the file that is currently executed",
                        );
                        continue;
                    }
                    self.next_line_to_execute.set(line);
                    self.break_in_pending.set(true);
                    *skip = true;
                    self.send_reply(host, PacketType::ScTargetRunning, &builder);
                    break;
                }
                PacketType::CsDetach => {
                    self.detached.set(true);
                    self.send_reply(host, PacketType::ScTargetRunning, &builder);
                    break;
                }
                PacketType::CsTerminate => {
                    log::error!(target: "hldp", "script evaluation aborted via debugging interface");
                    host.mark_fatal_error();
                    break;
                }
                PacketType::CsCreateExpression => {
                    self.handle_create_expression(host, &mut reader);
                    continue;
                }
                PacketType::CsQueryExpressionChildren => {
                    self.handle_query_expression_children(host, &mut reader);
                    continue;
                }
                PacketType::CsSetExpressionValue => {
                    self.handle_set_expression_value(host, &mut reader);
                    continue;
                }
                ty if ty.is_breakpoint_command() => {
                    self.handle_breakpoint_command(host, ty, &mut reader);
                    continue;
                }
                _ => {
                    self.send_error_packet(
                        host,
                        "Unexpected packet received while the target is stopped",
                    );
                    continue;
                }
            }
        }

        // Expression handles are only meaningful within one stop.
        self.expressions.borrow_mut().clear();
        self.serving.set(false);
    }

    // ------------------------------------ request handlers ---------------------------------------

    fn handle_create_expression(&self, host: &dyn ScriptHost, reader: &mut RequestReader) {
        let (frame_id, text) = match (reader.read_i32(), reader.read_string()) {
            (Ok(frame_id), Ok(text)) => (frame_id, text),
            _ => {
                self.send_error_packet(host, "Invalid expression request");
                return;
            }
        };

        let scope = {
            let stack = self.call_stack.borrow();
            if frame_id < 0 || frame_id as usize >= stack.len() {
                None
            } else {
                Some(stack[frame_id as usize].clone())
            }
        };
        let Some(scope) = scope else {
            self.send_error_packet(host, "Invalid frame ID");
            return;
        };

        match Expression::resolve(host, &text, &scope) {
            Some(expression) => {
                let mut builder = ReplyBuilder::new();
                {
                    let mut cache = self.expressions.borrow_mut();
                    let id = cache.insert(expression);
                    let expression = cache.get(id).expect("just inserted");
                    append_expression(&mut builder, expression);
                }
                self.send_reply(host, PacketType::ScExpressionCreated, &builder);
            }
            None => self.send_error_packet(host, &format!("Failed to create expression: {text}")),
        }
    }

    fn handle_query_expression_children(&self, host: &dyn ScriptHost, reader: &mut RequestReader) {
        let id = match reader.read_i32() {
            Ok(id) => id,
            Err(_) => {
                self.send_error_packet(host, "Invalid expression request");
                return;
            }
        };

        let new_children = {
            let cache = self.expressions.borrow();
            let Some(expression) = cache.get(id) else {
                self.send_error_packet(host, "Could not find an expression with the specified ID");
                return;
            };
            if expression.children_registered {
                None
            } else {
                Some(expression.create_children(host))
            }
        };

        if let Some(children) = new_children {
            let mut cache = self.expressions.borrow_mut();
            let child_ids: Vec<_> = children.into_iter().map(|child| cache.insert(child)).collect();
            let parent = cache.get_mut(id).expect("looked up above");
            parent.child_count = child_ids.len() as i32;
            parent.registered_children = child_ids;
            parent.children_registered = true;
        }

        let mut builder = ReplyBuilder::new();
        {
            let cache = self.expressions.borrow();
            let parent = cache.get(id).expect("looked up above");
            builder.append_i32(parent.registered_children.len() as i32);
            for child_id in &parent.registered_children {
                let child = cache.get(*child_id).expect("children are cached");
                append_expression(&mut builder, child);
            }
        }
        self.send_reply(host, PacketType::ScExpressionChildrenQueried, &builder);
    }

    fn handle_set_expression_value(&self, host: &dyn ScriptHost, reader: &mut RequestReader) {
        let (id, value) = match (reader.read_i32(), reader.read_string()) {
            (Ok(id), Ok(value)) => (id, value),
            _ => {
                self.send_error_packet(host, "Invalid expression request");
                return;
            }
        };

        let result = {
            let mut cache = self.expressions.borrow_mut();
            match cache.get_mut(id) {
                Some(expression) => expression.update_value(host, &value),
                None => Err("Could not find an expression with the specified ID".to_string()),
            }
        };
        match result {
            Ok(()) => {
                self.send_reply(host, PacketType::ScExpressionUpdated, &ReplyBuilder::new());
            }
            Err(details) => self.send_error_packet(host, &details),
        }
    }

    /// Breakpoint management, serviced both while running and while
    /// stopped.
    fn handle_breakpoint_command(
        &self,
        host: &dyn ScriptHost,
        request: PacketType,
        reader: &mut RequestReader,
    ) {
        match request {
            PacketType::CsCreateBreakpoint => {
                let (file, line) = match (reader.read_string(), reader.read_i32()) {
                    (Ok(file), Ok(line)) => (file, line),
                    _ => {
                        self.send_error_packet(host, "Invalid breakpoint request");
                        return;
                    }
                };
                let id = self
                    .breakpoints
                    .borrow_mut()
                    .create_location_breakpoint(host, &file, line);
                if id == INVALID_BREAKPOINT_ID {
                    self.send_error_packet(host, &format!("Invalid or non-existent file: {file}"));
                    return;
                }
                let mut builder = ReplyBuilder::new();
                builder.append_i32(id);
                self.send_reply(host, PacketType::ScBreakpointCreated, &builder);
            }
            PacketType::CsCreateFunctionBreakpoint => {
                let name = match reader.read_string() {
                    Ok(name) => name,
                    Err(_) => {
                        self.send_error_packet(host, "Invalid breakpoint request");
                        return;
                    }
                };
                let id = self.breakpoints.borrow_mut().create_function_breakpoint(&name);
                let mut builder = ReplyBuilder::new();
                builder.append_i32(id);
                self.send_reply(host, PacketType::ScBreakpointCreated, &builder);
            }
            PacketType::CsCreateDomainSpecificBreakpoint => {
                let (kind, argument) = match (reader.read_i32(), reader.read_string(), reader.read_i32())
                {
                    (Ok(kind), Ok(argument), Ok(_reserved)) => (kind, argument),
                    _ => {
                        self.send_error_packet(host, "Invalid breakpoint request");
                        return;
                    }
                };
                let Some(kind) = DomainSpecificKind::from_repr(kind) else {
                    self.send_error_packet(host, "Invalid domain-specific breakpoint kind");
                    return;
                };
                let extension = match kind {
                    DomainSpecificKind::VariableAccessed => {
                        DomainSpecificBreakpoint::VariableAccessed(argument.clone())
                    }
                    DomainSpecificKind::VariableUpdated => {
                        DomainSpecificBreakpoint::VariableUpdated(argument.clone())
                    }
                    DomainSpecificKind::MessageSent => {
                        DomainSpecificBreakpoint::MessageSent(argument.clone())
                    }
                    DomainSpecificKind::TargetCreated => {
                        DomainSpecificBreakpoint::TargetCreated(argument.clone())
                    }
                };
                if matches!(
                    kind,
                    DomainSpecificKind::VariableAccessed | DomainSpecificKind::VariableUpdated
                ) {
                    self.watched_variables
                        .borrow_mut()
                        .insert(CaseInsensitiveName::new(&argument));
                }
                let id = self
                    .breakpoints
                    .borrow_mut()
                    .create_domain_specific_breakpoint(extension);
                let mut builder = ReplyBuilder::new();
                builder.append_i32(id);
                self.send_reply(host, PacketType::ScBreakpointCreated, &builder);
            }
            PacketType::CsDeleteBreakpoint => {
                let id = match reader.read_i32() {
                    Ok(id) => id,
                    Err(_) => {
                        self.send_error_packet(host, "Invalid breakpoint request");
                        return;
                    }
                };
                self.breakpoints.borrow_mut().delete(id);
                self.send_reply(host, PacketType::ScBreakpointUpdated, &ReplyBuilder::new());
            }
            PacketType::CsUpdateBreakpoint => {
                let parsed = (
                    reader.read_i32(),
                    reader.read_i32(),
                    reader.read_i32(),
                    reader.read_i32(),
                    reader.read_string(),
                );
                let (id, field, int_arg1) = match parsed {
                    (Ok(id), Ok(field), Ok(int1), Ok(_int2), Ok(_string)) => (id, field, int1),
                    _ => {
                        self.send_error_packet(host, "Invalid breakpoint request");
                        return;
                    }
                };
                let updated = {
                    let mut breakpoints = self.breakpoints.borrow_mut();
                    match breakpoints.try_lookup_mut(id) {
                        None => Err("Could not find a breakpoint with the specified ID"),
                        Some(breakpoint) => match BreakpointField::from_repr(field) {
                            Some(BreakpointField::IsEnabled) => {
                                breakpoint.enabled = int_arg1 != 0;
                                Ok(())
                            }
                            None => Err("Invalid breakpoint field"),
                        },
                    }
                };
                match updated {
                    Ok(()) => {
                        self.send_reply(host, PacketType::ScBreakpointUpdated, &ReplyBuilder::new());
                    }
                    Err(details) => self.send_error_packet(host, details),
                }
            }
            PacketType::CsQueryBreakpoint => {
                self.send_error_packet(host, "Breakpoint queries are not supported");
            }
            _ => self.send_error_packet(host, "Unexpected breakpoint command"),
        }
    }

    // ------------------------------------ transport helpers --------------------------------------

    fn receive_request(
        &self,
        host: &dyn ScriptHost,
        reader: &mut RequestReader,
    ) -> Result<PacketType, Error> {
        match self.transport.borrow_mut().receive(reader) {
            Ok(request) => Ok(request),
            Err(e @ Error::UnknownPacket(_)) => Err(e),
            Err(e) => {
                self.fail_session(host, "failed to receive a debug protocol request", &e);
                Err(e)
            }
        }
    }

    fn send_reply(&self, host: &dyn ScriptHost, reply: PacketType, builder: &ReplyBuilder) -> bool {
        match self.transport.borrow_mut().send(reply, builder.as_bytes()) {
            Ok(()) => true,
            Err(e) => {
                self.fail_session(host, "failed to send a debug protocol reply", &e);
                false
            }
        }
    }

    fn send_error_packet(&self, host: &dyn ScriptHost, details: &str) {
        log::warn!(target: "hldp", "error reported to the debug client: {details}");
        let mut builder = ReplyBuilder::new();
        builder.append_string(details);
        self.send_reply(host, PacketType::ScError, &builder);
    }

    fn fail_session(&self, host: &dyn ScriptHost, context: &str, error: &Error) {
        log::error!(target: "hldp", "{context}: {error:#}");
        self.failed.set(true);
        host.mark_fatal_error();
    }
}

impl Drop for HldpServer {
    fn drop(&mut self) {
        let transport = self.transport.get_mut();
        if !transport.is_connected() {
            return;
        }
        // Exit code is not available here; 0 means "unavailable".
        let mut builder = ReplyBuilder::new();
        builder.append_i32(0);
        weak_error!(
            transport.send(PacketType::ScTargetExited, builder.as_bytes()),
            "teardown notification:"
        );
    }
}

fn append_expression(builder: &mut ReplyBuilder, expression: &Expression) {
    builder.append_i32(expression.id);
    builder.append_string(&expression.name);
    builder.append_string(&expression.type_label);
    builder.append_string(&expression.value);
    // Reserved flags word.
    builder.append_i32(0);
    builder.append_i32(expression.child_count);
}
