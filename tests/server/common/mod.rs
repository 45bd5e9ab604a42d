//! Test harness: a scripted interpreter hosting the debug server on its own
//! thread, and a TCP client driving it through the wire protocol.

use hldp::protocol::codec::{ReplyBuilder, RequestReader};
use hldp::protocol::{BANNER, PROTOCOL_VERSION, PacketType, StopReason, SUBEXPRESSION_DELIMITER};
use hldp::{FunctionCall, HldpServer, MessageKind, ScopePosition, ScriptHost, VariableAccess};
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, VecDeque};
use std::io::{Read, Write};
use std::net::TcpStream;
use std::thread::JoinHandle;
use std::time::Duration;

const READ_TIMEOUT: Duration = Duration::from_secs(10);

// ------------------------------------- scripted interpreter -------------------------------------

/// Side effect a statement performs when executed.
#[derive(Clone)]
pub enum Action {
    Nop,
    SetVar(&'static str, &'static str),
    ReadVar(&'static str),
    Message(MessageKind, &'static str),
    AddTarget(&'static str),
    /// Invoke a user-defined function, nesting the call stack.
    Call(&'static str),
}

#[derive(Clone)]
pub struct Stmt {
    pub call: FunctionCall,
    pub action: Action,
}

pub fn stmt(name: &str, line: i32, args: &[&str], action: Action) -> Stmt {
    Stmt {
        call: FunctionCall::new(name, line, args.iter().map(|a| a.to_string()).collect()),
        action,
    }
}

pub fn nop(name: &str, line: i32) -> Stmt {
    stmt(name, line, &[], Action::Nop)
}

#[derive(Clone)]
pub struct Function {
    pub file: &'static str,
    pub body: Vec<Stmt>,
}

#[derive(Clone)]
pub struct Script {
    pub file: &'static str,
    pub statements: Vec<Stmt>,
}

/// Interpreter state exposed to the server through [`ScriptHost`]. Script
/// files are addressed by bare name and canonicalized under `/proj`.
#[derive(Default)]
pub struct Project {
    pub files: Vec<String>,
    pub variables: RefCell<BTreeMap<String, String>>,
    pub cache: BTreeMap<String, String>,
    pub targets: RefCell<BTreeMap<String, Vec<(String, String)>>>,
    file_stack: RefCell<Vec<String>>,
    pub fatal: Cell<bool>,
}

impl Project {
    pub fn with_files(files: &[&str]) -> Self {
        Self {
            files: files.iter().map(|f| f.to_string()).collect(),
            ..Self::default()
        }
    }

    fn enter_file(&self, name: &str) {
        self.file_stack.borrow_mut().push(self.real_path(name));
    }

    fn leave_file(&self) {
        self.file_stack.borrow_mut().pop();
    }
}

impl ScriptHost for Project {
    fn current_source_file(&self) -> String {
        self.file_stack
            .borrow()
            .last()
            .cloned()
            .expect("a script is executing")
    }

    fn current_position(&self) -> ScopePosition {
        self.file_stack.borrow().len() as ScopePosition
    }

    fn real_path(&self, path: &str) -> String {
        let name = path.strip_prefix("/proj/").unwrap_or(path);
        if self.files.iter().any(|f| f == name) {
            format!("/proj/{name}")
        } else {
            String::new()
        }
    }

    fn lookup_variable(&self, _: ScopePosition, name: &str) -> Option<String> {
        self.variables.borrow().get(name).cloned()
    }

    fn update_variable(&self, _: ScopePosition, name: &str, value: &str) -> Result<(), String> {
        match self.variables.borrow_mut().get_mut(name) {
            Some(stored) => {
                *stored = value.to_string();
                Ok(())
            }
            None => Err(format!("Unknown variable: {name}")),
        }
    }

    fn cache_entry(&self, key: &str) -> Option<String> {
        self.cache.get(key).cloned()
    }

    fn has_target(&self, name: &str) -> bool {
        self.targets.borrow().contains_key(name)
    }

    fn target_properties(&self, name: &str) -> Vec<(String, String)> {
        self.targets.borrow().get(name).cloned().unwrap_or_default()
    }

    fn mark_fatal_error(&self) {
        self.fatal.set(true);
    }
}

pub struct Interpreter {
    pub project: Project,
    pub functions: BTreeMap<&'static str, Function>,
}

impl Interpreter {
    pub fn new(project: Project) -> Self {
        Self {
            project,
            functions: BTreeMap::new(),
        }
    }

    pub fn define_function(&mut self, name: &'static str, function: Function) {
        self.functions.insert(name, function);
    }

    pub fn run(&self, server: &HldpServer, script: &Script) {
        self.project.enter_file(script.file);
        self.run_block(server, &script.statements);
        self.project.leave_file();
    }

    fn run_block(&self, server: &HldpServer, statements: &[Stmt]) {
        let calls: Vec<FunctionCall> = statements.iter().map(|s| s.call.clone()).collect();
        let mut i = 0;
        while i < statements.len() {
            if self.project.fatal.get() {
                return;
            }
            let statement = &statements[i];
            let mut skip = false;
            let scope = server.on_statement(&self.project, &statement.call, &mut skip);
            if skip {
                let mut next = i;
                server.adjust_next_executed_function(&calls, &mut next);
                drop(scope);
                i = next;
                continue;
            }
            self.execute(server, statement);
            drop(scope);
            i += 1;
        }
    }

    fn execute(&self, server: &HldpServer, statement: &Stmt) {
        match &statement.action {
            Action::Nop => {}
            Action::SetVar(name, value) => {
                self.project
                    .variables
                    .borrow_mut()
                    .insert(name.to_string(), value.to_string());
                server.on_variable_access(&self.project, name, VariableAccess::Write);
            }
            Action::ReadVar(name) => {
                let _ = self.project.variables.borrow().get(*name).cloned();
                server.on_variable_access(&self.project, name, VariableAccess::Read);
            }
            Action::Message(kind, text) => server.on_message(&self.project, *kind, text),
            Action::AddTarget(name) => {
                self.project.targets.borrow_mut().insert(
                    name.to_string(),
                    vec![("OUTPUT_NAME".to_string(), format!("{name}.bin"))],
                );
                server.on_target_created(&self.project, name);
            }
            Action::Call(name) => {
                let function = &self.functions[name];
                self.project.enter_file(function.file);
                self.run_block(server, &function.body);
                self.project.leave_file();
            }
        }
    }
}

// ------------------------------------- session bootstrap -----------------------------------------

pub struct Session {
    handle: JoinHandle<()>,
}

impl Session {
    pub fn finish(self) {
        self.handle.join().expect("interpreter thread panicked");
    }
}

/// Run the interpreter + server on a worker thread and return a connected,
/// handshaken client.
pub fn start_session(interpreter: Interpreter, script: Script) -> (Session, TestClient) {
    let server = HldpServer::new(0).expect("bind debug server");
    let port = server.local_port().expect("bound port");
    let handle = std::thread::spawn(move || {
        if server.wait_for_client().is_ok() {
            interpreter.run(&server, &script);
        }
        // Dropping the server emits scTargetExited.
    });
    let client = TestClient::connect(port);
    (Session { handle }, client)
}

/// Same as [`start_session`], but the client does not answer the handshake.
pub fn start_session_raw(interpreter: Interpreter, script: Script) -> (Session, TestClient) {
    let server = HldpServer::new(0).expect("bind debug server");
    let port = server.local_port().expect("bound port");
    let handle = std::thread::spawn(move || {
        if server.wait_for_client().is_ok() {
            interpreter.run(&server, &script);
        }
    });
    let client = TestClient::connect_raw(port);
    (Session { handle }, client)
}

// ------------------------------------- protocol client -------------------------------------------

#[derive(Debug)]
pub struct Frame {
    pub id: i32,
    pub function: String,
    pub arguments: String,
    pub file: String,
    pub line: i32,
}

#[derive(Debug)]
pub struct Stop {
    pub reason: StopReason,
    pub int_param: i32,
    pub string_param: String,
    /// Innermost frame first.
    pub frames: Vec<Frame>,
}

#[derive(Debug)]
pub struct ExpressionInfo {
    pub id: i32,
    pub name: String,
    pub type_label: String,
    pub value: String,
    pub flags: i32,
    pub child_count: i32,
}

pub struct TestClient {
    stream: TcpStream,
    /// Debug messages observed while waiting for another packet.
    messages: VecDeque<String>,
}

impl TestClient {
    /// Connect, verify the banner + scHandshake and reply with csHandshake.
    pub fn connect(port: u16) -> Self {
        let mut client = Self::connect_raw(port);
        client.send(PacketType::CsHandshake, &ReplyBuilder::new());
        client
    }

    /// Connect and consume the banner + scHandshake without answering.
    pub fn connect_raw(port: u16) -> Self {
        let stream = TcpStream::connect(("127.0.0.1", port)).expect("connect to debug server");
        stream
            .set_read_timeout(Some(READ_TIMEOUT))
            .expect("set read timeout");
        let mut client = Self {
            stream,
            messages: VecDeque::new(),
        };

        let mut banner = vec![0u8; BANNER.len()];
        client.stream.read_exact(&mut banner).expect("read banner");
        assert_eq!(banner, BANNER);

        let (packet, mut reader) = client.receive_any().expect("read handshake");
        assert_eq!(packet, PacketType::ScHandshake);
        assert_eq!(reader.read_i32().unwrap(), PROTOCOL_VERSION);
        assert_eq!(reader.read_string().unwrap(), SUBEXPRESSION_DELIMITER);
        client
    }

    pub fn send(&mut self, packet: PacketType, builder: &ReplyBuilder) {
        let payload = builder.as_bytes();
        let mut header = [0u8; 8];
        header[..4].copy_from_slice(&(packet as u32).to_le_bytes());
        header[4..].copy_from_slice(&(payload.len() as u32).to_le_bytes());
        self.stream.write_all(&header).expect("send header");
        self.stream.write_all(payload).expect("send payload");
    }

    pub fn send_empty(&mut self, packet: PacketType) {
        self.send(packet, &ReplyBuilder::new());
    }

    /// Receive the next packet, whatever it is.
    pub fn receive_any(&mut self) -> std::io::Result<(PacketType, RequestReader)> {
        let mut header = [0u8; 8];
        self.stream.read_exact(&mut header)?;
        let raw_type = u32::from_le_bytes(header[..4].try_into().unwrap());
        let payload_size = u32::from_le_bytes(header[4..].try_into().unwrap());
        let mut reader = RequestReader::default();
        let payload = reader.reset(payload_size as usize);
        if !payload.is_empty() {
            self.stream.read_exact(payload)?;
        }
        let packet = PacketType::from_repr(raw_type)
            .unwrap_or_else(|| panic!("unknown packet type {raw_type}"));
        Ok((packet, reader))
    }

    /// Receive the next packet, collecting debug messages on the way.
    pub fn receive(&mut self) -> (PacketType, RequestReader) {
        loop {
            let (packet, mut reader) = self.receive_any().expect("receive packet");
            if packet == PacketType::ScDebugMessage {
                let _stream = reader.read_i32().unwrap();
                self.messages.push_back(reader.read_string().unwrap());
                continue;
            }
            return (packet, reader);
        }
    }

    pub fn expect_stopped(&mut self) -> Stop {
        let (packet, mut reader) = self.receive();
        assert_eq!(packet, PacketType::ScTargetStopped);
        let reason = StopReason::from_repr(reader.read_i32().unwrap()).expect("known stop reason");
        let int_param = reader.read_i32().unwrap();
        let string_param = reader.read_string().unwrap();
        let count = reader.read_i32().unwrap();
        let frames = (0..count)
            .map(|_| Frame {
                id: reader.read_i32().unwrap(),
                function: reader.read_string().unwrap(),
                arguments: reader.read_string().unwrap(),
                file: reader.read_string().unwrap(),
                line: reader.read_i32().unwrap(),
            })
            .collect();
        Stop {
            reason,
            int_param,
            string_param,
            frames,
        }
    }

    pub fn expect_running(&mut self) {
        let (packet, _) = self.receive();
        assert_eq!(packet, PacketType::ScTargetRunning);
    }

    pub fn expect_error(&mut self) -> String {
        let (packet, mut reader) = self.receive();
        assert_eq!(packet, PacketType::ScError);
        reader.read_string().unwrap()
    }

    pub fn expect_exited(&mut self) -> i32 {
        let (packet, mut reader) = self.receive();
        assert_eq!(packet, PacketType::ScTargetExited);
        reader.read_i32().unwrap()
    }

    /// Next debug message, either already collected or the next packet.
    pub fn expect_message(&mut self) -> String {
        if let Some(text) = self.messages.pop_front() {
            return text;
        }
        let (packet, mut reader) = self.receive_any().expect("receive packet");
        assert_eq!(packet, PacketType::ScDebugMessage);
        assert_eq!(reader.read_i32().unwrap(), 0);
        reader.read_string().unwrap()
    }

    // --------------------------------- flow control ----------------------------------------------

    pub fn continue_target(&mut self) {
        self.send_empty(PacketType::CsContinue);
        self.expect_running();
    }

    pub fn step_in(&mut self) {
        self.send_empty(PacketType::CsStepIn);
        self.expect_running();
    }

    pub fn step_over(&mut self) {
        self.send_empty(PacketType::CsStepOver);
        self.expect_running();
    }

    pub fn step_out(&mut self) {
        self.send_empty(PacketType::CsStepOut);
        self.expect_running();
    }

    pub fn set_next_statement(&mut self, file: &str, line: i32) {
        let mut builder = ReplyBuilder::new();
        builder.append_string(file);
        builder.append_i32(line);
        self.send(PacketType::CsSetNextStatement, &builder);
    }

    // --------------------------------- breakpoints -----------------------------------------------

    pub fn try_create_line_breakpoint(&mut self, file: &str, line: i32) -> Result<i32, String> {
        let mut builder = ReplyBuilder::new();
        builder.append_string(file);
        builder.append_i32(line);
        self.send(PacketType::CsCreateBreakpoint, &builder);
        let (packet, mut reader) = self.receive();
        match packet {
            PacketType::ScBreakpointCreated => Ok(reader.read_i32().unwrap()),
            PacketType::ScError => Err(reader.read_string().unwrap()),
            other => panic!("unexpected reply {other:?}"),
        }
    }

    pub fn create_line_breakpoint(&mut self, file: &str, line: i32) -> i32 {
        self.try_create_line_breakpoint(file, line)
            .expect("breakpoint created")
    }

    pub fn create_function_breakpoint(&mut self, name: &str) -> i32 {
        let mut builder = ReplyBuilder::new();
        builder.append_string(name);
        self.send(PacketType::CsCreateFunctionBreakpoint, &builder);
        self.expect_breakpoint_created()
    }

    pub fn create_domain_breakpoint(&mut self, kind: i32, argument: &str) -> i32 {
        let mut builder = ReplyBuilder::new();
        builder.append_i32(kind);
        builder.append_string(argument);
        builder.append_i32(0);
        self.send(PacketType::CsCreateDomainSpecificBreakpoint, &builder);
        self.expect_breakpoint_created()
    }

    pub fn expect_breakpoint_created(&mut self) -> i32 {
        let (packet, mut reader) = self.receive();
        assert_eq!(packet, PacketType::ScBreakpointCreated);
        reader.read_i32().unwrap()
    }

    pub fn delete_breakpoint(&mut self, id: i32) {
        let mut builder = ReplyBuilder::new();
        builder.append_i32(id);
        self.send(PacketType::CsDeleteBreakpoint, &builder);
        let (packet, _) = self.receive();
        assert_eq!(packet, PacketType::ScBreakpointUpdated);
    }

    pub fn set_breakpoint_enabled(&mut self, id: i32, enabled: bool) {
        let mut builder = ReplyBuilder::new();
        builder.append_i32(id);
        builder.append_i32(0); // field: IsEnabled
        builder.append_i32(enabled as i32);
        builder.append_i32(0);
        builder.append_string("");
        self.send(PacketType::CsUpdateBreakpoint, &builder);
        let (packet, _) = self.receive();
        assert_eq!(packet, PacketType::ScBreakpointUpdated);
    }

    // --------------------------------- expressions -----------------------------------------------

    pub fn try_create_expression(
        &mut self,
        frame_id: i32,
        text: &str,
    ) -> Result<ExpressionInfo, String> {
        let mut builder = ReplyBuilder::new();
        builder.append_i32(frame_id);
        builder.append_string(text);
        self.send(PacketType::CsCreateExpression, &builder);
        let (packet, mut reader) = self.receive();
        match packet {
            PacketType::ScExpressionCreated => Ok(read_expression(&mut reader)),
            PacketType::ScError => Err(reader.read_string().unwrap()),
            other => panic!("unexpected reply {other:?}"),
        }
    }

    pub fn create_expression(&mut self, frame_id: i32, text: &str) -> ExpressionInfo {
        self.try_create_expression(frame_id, text)
            .expect("expression created")
    }

    pub fn try_query_children(&mut self, id: i32) -> Result<Vec<ExpressionInfo>, String> {
        let mut builder = ReplyBuilder::new();
        builder.append_i32(id);
        self.send(PacketType::CsQueryExpressionChildren, &builder);
        let (packet, mut reader) = self.receive();
        match packet {
            PacketType::ScExpressionChildrenQueried => {
                let count = reader.read_i32().unwrap();
                Ok((0..count).map(|_| read_expression(&mut reader)).collect())
            }
            PacketType::ScError => Err(reader.read_string().unwrap()),
            other => panic!("unexpected reply {other:?}"),
        }
    }

    pub fn query_children(&mut self, id: i32) -> Vec<ExpressionInfo> {
        self.try_query_children(id).expect("children queried")
    }

    pub fn set_expression_value(&mut self, id: i32, value: &str) -> Result<(), String> {
        let mut builder = ReplyBuilder::new();
        builder.append_i32(id);
        builder.append_string(value);
        self.send(PacketType::CsSetExpressionValue, &builder);
        let (packet, mut reader) = self.receive();
        match packet {
            PacketType::ScExpressionUpdated => Ok(()),
            PacketType::ScError => Err(reader.read_string().unwrap()),
            other => panic!("unexpected reply {other:?}"),
        }
    }
}

fn read_expression(reader: &mut RequestReader) -> ExpressionInfo {
    ExpressionInfo {
        id: reader.read_i32().unwrap(),
        name: reader.read_string().unwrap(),
        type_label: reader.read_string().unwrap(),
        value: reader.read_string().unwrap(),
        flags: reader.read_i32().unwrap(),
        child_count: reader.read_i32().unwrap(),
    }
}
