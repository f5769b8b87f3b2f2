use super::cache::WriteCache;
use super::inifile;
use super::notification::{
    ADVISORY_TOPICS, LogNotifications, Notification, NotificationHandler, NotificationKind,
    classify,
};
use super::script::{self, Statement};
use super::transport::{DdeEvent, DdeTransport};
use super::CommandClient;
use crate::config::DdeConfig;
use crate::error::SxmError;
use crate::types::{ConnectionState, DecimalSeparator, ParamKind};
use crate::utils::{PollError, poll_until_deadline};
use log::{debug, info, warn};
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::time::{Duration, Instant};

/// Identifies one submitted command until its reply is claimed
pub type RequestId = u64;

#[derive(Debug, Clone, PartialEq)]
pub struct ClientOptions {
    pub service: String,
    pub topic: String,
    /// Timeout handed to each synchronous DDE transaction
    pub transaction_timeout: Duration,
    /// How long `send_wait` waits for the command echo
    pub reply_deadline: Duration,
    /// Sleep between pumps while waiting
    pub poll_interval: Duration,
    pub decimal_separator: DecimalSeparator,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            service: "SXM".to_string(),
            topic: "Remote".to_string(),
            transaction_timeout: Duration::from_millis(1000),
            reply_deadline: Duration::from_millis(5000),
            poll_interval: Duration::from_millis(1),
            decimal_separator: DecimalSeparator::default(),
        }
    }
}

impl From<&DdeConfig> for ClientOptions {
    fn from(config: &DdeConfig) -> Self {
        Self {
            service: config.service.clone(),
            topic: config.topic.clone(),
            transaction_timeout: Duration::from_millis(config.transaction_timeout_ms),
            reply_deadline: Duration::from_millis(config.reply_timeout_ms),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            decimal_separator: config.decimal_separator,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Claim {
    /// A caller will collect the reply with `wait_reply`
    Awaited,
    /// Fire and forget; the reply is logged and dropped
    Detached,
}

#[derive(Debug)]
struct PendingRequest {
    id: RequestId,
    claim: Claim,
}

#[derive(Debug)]
enum Outcome {
    Answer(Vec<u8>),
    Disconnected,
}

/// Everything touched while pumping events, split from the transport so
/// both can be borrowed at once.
struct Session {
    state: ConnectionState,
    /// Requests in submission order; echoes answer the front entry
    pending: VecDeque<PendingRequest>,
    completed: HashMap<RequestId, Outcome>,
    last_answer: Option<Vec<u8>>,
    scanning: Option<bool>,
    handler: Box<dyn NotificationHandler>,
}

impl Session {
    fn on_event(&mut self, event: DdeEvent) {
        match event {
            DdeEvent::AdviseData { topic, payload } => {
                let notification = Notification {
                    kind: classify(&topic, &payload),
                    received_at: Instant::now(),
                };
                match &notification.kind {
                    NotificationKind::CommandEcho { payload } => self.complete_oldest(payload),
                    NotificationKind::ScanState { scanning } => self.scanning = Some(*scanning),
                    _ => {}
                }
                self.handler.dispatch(&notification);
            }
            DdeEvent::Disconnected => self.fail_pending(),
        }
    }

    fn complete_oldest(&mut self, payload: &[u8]) {
        self.last_answer = Some(payload.to_vec());
        match self.pending.pop_front() {
            Some(PendingRequest {
                id,
                claim: Claim::Awaited,
            }) => {
                self.completed.insert(id, Outcome::Answer(payload.to_vec()));
            }
            Some(PendingRequest {
                id,
                claim: Claim::Detached,
            }) => debug!("Reply to #{id}: {}", script::decode_payload(payload).trim()),
            None => debug!(
                "Unsolicited command output: {}",
                script::decode_payload(payload).trim()
            ),
        }
    }

    fn fail_pending(&mut self) {
        if self.state != ConnectionState::Disconnected {
            warn!("SXM ended the DDE conversation");
        }
        self.state = ConnectionState::Disconnected;
        for request in self.pending.drain(..) {
            if request.claim == Claim::Awaited {
                self.completed.insert(request.id, Outcome::Disconnected);
            }
        }
    }
}

/// Client side of the `SXM|Remote` DDE conversation.
///
/// Commands are answered asynchronously on the `Command` advisory topic,
/// without any correlation tag. The client therefore keeps submitted
/// requests in a FIFO and hands each echo to the oldest one; a caller holds
/// a [`RequestId`] and claims its own reply.
///
/// All methods must be called from the thread that created the transport.
pub struct CommandProtocolClient<T: DdeTransport> {
    transport: T,
    options: ClientOptions,
    session: Session,
    cache: WriteCache,
    next_id: RequestId,
    registered: bool,
    advised: Vec<&'static str>,
}

impl<T: DdeTransport> CommandProtocolClient<T> {
    pub fn new(transport: T, options: ClientOptions) -> Self {
        Self {
            transport,
            options,
            session: Session {
                state: ConnectionState::Disconnected,
                pending: VecDeque::new(),
                completed: HashMap::new(),
                last_answer: None,
                scanning: None,
                handler: Box::new(LogNotifications),
            },
            cache: WriteCache::new(),
            next_id: 1,
            registered: false,
            advised: Vec::new(),
        }
    }

    /// Replace the default logging handler for advisories
    pub fn with_handler(mut self, handler: impl NotificationHandler + 'static) -> Self {
        self.session.handler = Box::new(handler);
        self
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    pub fn state(&self) -> ConnectionState {
        self.session.state
    }

    pub fn is_connected(&self) -> bool {
        self.session.state.accepts_commands()
    }

    /// Last `Scan on`/`Scan off` seen, if any
    pub fn scanning(&self) -> Option<bool> {
        self.session.scanning
    }

    /// Most recent command output, claimed or not
    pub fn last_answer(&self) -> Option<&[u8]> {
        self.session.last_answer.as_deref()
    }

    /// True while any submitted request, detached or not, still expects an echo
    pub fn awaiting_answer(&self) -> bool {
        !self.session.pending.is_empty()
    }

    /// Register, open the conversation and subscribe to every advisory topic.
    ///
    /// A failed subscription tears down the ones already made before the
    /// error is returned. Calling this while connected is a no-op.
    pub fn connect(&mut self) -> Result<(), SxmError> {
        if self.is_connected() {
            return Ok(());
        }
        if self.registered {
            // Left over from a conversation the server ended
            self.teardown();
        }
        self.session.state = ConnectionState::Connecting;

        if let Err(code) = self.transport.register() {
            self.session.state = ConnectionState::Disconnected;
            return Err(SxmError::RegistrationFailed(code));
        }
        self.registered = true;

        if let Err(code) = self
            .transport
            .connect(&self.options.service, &self.options.topic)
        {
            self.teardown();
            return Err(SxmError::ConversationFailed {
                service: self.options.service.clone(),
                topic: self.options.topic.clone(),
                code,
            });
        }
        self.session.state = ConnectionState::Connected;

        for topic in ADVISORY_TOPICS {
            if let Err(code) = self.transport.advise(topic, false) {
                self.teardown();
                return Err(SxmError::AdvisoryFailed {
                    topic: topic.to_string(),
                    code,
                });
            }
            self.advised.push(topic);
        }

        info!(
            "Connected to {}|{} ({} advisory topics)",
            self.options.service,
            self.options.topic,
            self.advised.len()
        );
        Ok(())
    }

    /// Stop advisories in reverse order, end the conversation and
    /// unregister. Idempotent.
    pub fn disconnect(&mut self) {
        if self.session.state != ConnectionState::Disconnected || self.registered {
            info!("Disconnecting from {}", self.options.service);
        }
        self.teardown();
    }

    fn teardown(&mut self) {
        if self.session.state == ConnectionState::Disconnected {
            // Conversation already gone; its advise links died with it
            self.advised.clear();
        }
        while let Some(topic) = self.advised.pop() {
            if let Err(code) = self.transport.advise(topic, true) {
                debug!("Advise stop on '{topic}' failed (err={code:#x})");
            }
        }
        if self.session.state != ConnectionState::Disconnected {
            self.transport.disconnect();
        }
        self.session.state = ConnectionState::Disconnected;
        self.session.fail_pending();
        if self.registered {
            self.transport.unregister();
            self.registered = false;
        }
    }

    /// Deliver pending advisories. Returns true if anything was processed.
    pub fn pump(&mut self) -> bool {
        let session = &mut self.session;
        self.transport
            .pump_pending_events(&mut |event| session.on_event(event))
    }

    fn issue(&mut self, command: &str, claim: Claim) -> Result<RequestId, SxmError> {
        // Output that arrived after its request was given up must not be
        // taken for this request's echo
        self.pump();
        if !self.session.state.accepts_commands() {
            return Err(SxmError::NotConnected);
        }
        let payload = script::encode_program(&script::envelope(command));

        let id = self.next_id;
        self.next_id += 1;
        // Queued before submission: the echo may be dispatched during the
        // transaction itself.
        self.session.pending.push_back(PendingRequest { id, claim });

        debug!("DDE execute #{id}: {command}");
        if let Err(code) = self
            .transport
            .submit_command(&payload, self.options.transaction_timeout)
        {
            self.session.pending.retain(|r| r.id != id);
            return Err(SxmError::CommandRejected {
                command: command.to_string(),
                code,
            });
        }
        Ok(id)
    }

    /// Submit a command without waiting for its output.
    ///
    /// The request counts towards [`Self::awaiting_answer`] until its echo
    /// has been pumped.
    pub fn execute(&mut self, command: &str) -> Result<RequestId, SxmError> {
        self.issue(command, Claim::Detached)
    }

    /// Submit a command whose reply will be claimed with [`Self::wait_reply`]
    pub fn submit(&mut self, command: &str) -> Result<RequestId, SxmError> {
        self.issue(command, Claim::Awaited)
    }

    /// Pump until the reply to `id` arrives or the reply deadline passes.
    ///
    /// On expiry the request leaves the queue together with any older
    /// detached ones, the connection is marked `TimedOut` and
    /// `Err(TimedOut)` returned. `TimedOut` still accepts commands; the next
    /// successful reply restores `Connected`.
    pub fn wait_reply(&mut self, id: RequestId) -> Result<Vec<u8>, SxmError> {
        let deadline = Instant::now() + self.options.reply_deadline;
        let session = &mut self.session;
        let transport = &mut self.transport;

        let polled = poll_until_deadline(
            || {
                if let Some(outcome) = session.completed.remove(&id) {
                    return Ok(Some(outcome));
                }
                if !session.pending.iter().any(|r| r.id == id) {
                    return Err(SxmError::Protocol(format!("request #{id} is not pending")));
                }
                transport.pump_pending_events(&mut |event| session.on_event(event));
                Ok(session.completed.remove(&id))
            },
            deadline,
            self.options.poll_interval,
        );

        match polled {
            Ok(Some(Outcome::Answer(reply))) => {
                if self.session.state == ConnectionState::TimedOut {
                    info!("SXM is answering again");
                    self.session.state = ConnectionState::Connected;
                }
                Ok(reply)
            }
            Ok(Some(Outcome::Disconnected)) => Err(SxmError::NotConnected),
            Ok(None) => {
                self.session
                    .pending
                    .retain(|r| r.id > id || (r.id < id && r.claim == Claim::Awaited));
                warn!(
                    "No reply to request #{id} within {:?}",
                    self.options.reply_deadline
                );
                self.session.state = ConnectionState::TimedOut;
                Err(SxmError::TimedOut(self.options.reply_deadline))
            }
            Err(PollError::ConditionError(e)) => Err(e),
        }
    }

    /// Submit a command and wait for its output
    pub fn send_wait(&mut self, command: &str) -> Result<Vec<u8>, SxmError> {
        let id = self.submit(command)?;
        self.wait_reply(id)
    }

    /// Plain request transaction for `item`
    pub fn request(&mut self, item: &str) -> Result<Vec<u8>, SxmError> {
        if !self.session.state.accepts_commands() {
            return Err(SxmError::NotConnected);
        }
        self.transport
            .request(item, self.options.transaction_timeout)
            .map_err(|code| SxmError::CommandRejected {
                command: format!("request {item}"),
                code,
            })
    }

    /// Look up `[section] item` in the INI file SXM is running with
    ///
    /// # Returns
    /// `Ok(None)` when the file has no such entry
    pub fn get_ini_entry(
        &mut self,
        section: &str,
        item: &str,
    ) -> Result<Option<String>, SxmError> {
        let reply = self.request(inifile::INI_FILE_ITEM)?;
        let path = inifile::path_from_reply(&reply)
            .ok_or_else(|| SxmError::Protocol("SXM reported no INI file name".to_string()))?;
        debug!("Reading [{section}] {item} from {path}");
        inifile::read_entry(Path::new(&path), section, item)
    }

    fn query(&mut self, statement: &Statement) -> Result<Option<f64>, SxmError> {
        let reply = self.send_wait(&statement.to_string())?;
        let value = script::parse_numeric_reply(&reply, self.options.decimal_separator);
        if value.is_none() {
            debug!(
                "No numeric value in reply to {statement}: {:?}",
                script::decode_payload(&reply)
            );
        }
        Ok(value)
    }

    pub fn get_scan_para(&mut self, item: &str) -> Result<Option<f64>, SxmError> {
        self.query(&Statement::get_scan_para(item)?)
    }

    pub fn get_feed_para(&mut self, item: &str) -> Result<Option<f64>, SxmError> {
        self.query(&Statement::get_feed_para(item)?)
    }

    pub fn cache(&self) -> &WriteCache {
        &self.cache
    }
}

impl<T: DdeTransport> CommandClient for CommandProtocolClient<T> {
    fn send_scan_para(&mut self, edit_code: &str, value: f64) -> Result<(), SxmError> {
        let statement = Statement::scan_para(edit_code, value)?;
        self.send_wait(&statement.to_string())?;
        self.cache.remember(ParamKind::Edit, edit_code, value);
        Ok(())
    }

    fn send_dnc_para(&mut self, index: i32, value: f64) -> Result<(), SxmError> {
        let statement = Statement::dnc_para(index, value)?;
        self.send_wait(&statement.to_string())?;
        self.cache.remember(ParamKind::Dnc, &index.to_string(), value);
        Ok(())
    }

    fn feed_para(&mut self, name: &str, value: i32) -> Result<(), SxmError> {
        let statement = Statement::feed_para(name, value)?;
        self.send_wait(&statement.to_string())?;
        self.cache.remember(ParamKind::Feed, name, f64::from(value));
        Ok(())
    }

    fn set_channel(&mut self, index: i32, value: f64) -> Result<(), SxmError> {
        let statement = Statement::set_channel(index, value)?;
        self.send_wait(&statement.to_string())?;
        self.cache.remember(ParamKind::Channel, &index.to_string(), value);
        Ok(())
    }

    fn get_channel(&mut self, index: i32) -> Result<Option<f64>, SxmError> {
        self.query(&Statement::GetChannel { index })
    }

    fn write_cache(&self) -> &WriteCache {
        &self.cache
    }

    fn pump(&mut self) -> bool {
        CommandProtocolClient::pump(self)
    }

    fn disconnect(&mut self) {
        CommandProtocolClient::disconnect(self)
    }
}

impl<T: DdeTransport> Drop for CommandProtocolClient<T> {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dde::transport::fake::FakeTransport;

    fn fast_options() -> ClientOptions {
        ClientOptions {
            reply_deadline: Duration::from_millis(50),
            ..ClientOptions::default()
        }
    }

    fn connected(fake: &FakeTransport) -> CommandProtocolClient<FakeTransport> {
        let mut client = CommandProtocolClient::new(fake.clone(), fast_options());
        client.connect().unwrap();
        client
    }

    fn echo(payload: &str) -> DdeEvent {
        DdeEvent::AdviseData {
            topic: "Command".to_string(),
            payload: payload.as_bytes().to_vec(),
        }
    }

    #[test]
    fn test_connect_subscribes_every_topic_in_order() {
        let fake = FakeTransport::default();
        let client = connected(&fake);
        assert_eq!(client.state(), ConnectionState::Connected);
        assert_eq!(fake.active_advises(), ADVISORY_TOPICS.to_vec());
        assert!(fake.state.borrow().registered);
    }

    #[test]
    fn test_registration_failure_is_reported() {
        let fake = FakeTransport::default();
        fake.state.borrow_mut().fail_register = Some(0x4009);
        let mut client = CommandProtocolClient::new(fake.clone(), fast_options());
        assert!(matches!(
            client.connect(),
            Err(SxmError::RegistrationFailed(0x4009))
        ));
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_conversation_failure_unregisters() {
        let fake = FakeTransport::default();
        fake.state.borrow_mut().fail_connect = Some(0x400a);
        let mut client = CommandProtocolClient::new(fake.clone(), fast_options());
        let err = client.connect().unwrap_err();
        assert!(matches!(err, SxmError::ConversationFailed { code: 0x400a, .. }));
        assert!(err.is_recoverable());
        assert!(!fake.state.borrow().registered);
    }

    #[test]
    fn test_failed_advise_leaves_no_subscriptions() {
        let fake = FakeTransport::default();
        fake.state.borrow_mut().fail_advise = Some("ScanLine".to_string());
        let mut client = CommandProtocolClient::new(fake.clone(), fast_options());
        let err = client.connect().unwrap_err();
        assert!(matches!(err, SxmError::AdvisoryFailed { ref topic, .. } if topic == "ScanLine"));
        assert!(fake.active_advises().is_empty());
        assert!(!fake.state.borrow().connected);
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_disconnect_stops_advises_in_reverse_order() {
        let fake = FakeTransport::default();
        let mut client = connected(&fake);
        client.disconnect();
        client.disconnect();

        let stops: Vec<String> = fake
            .state
            .borrow()
            .advise_log
            .iter()
            .filter(|(_, stop)| *stop)
            .map(|(t, _)| t.clone())
            .collect();
        let mut expected: Vec<String> = ADVISORY_TOPICS.iter().map(|t| t.to_string()).collect();
        expected.reverse();
        assert_eq!(stops, expected);
        assert!(!fake.state.borrow().registered);
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_commands_require_connection() {
        let fake = FakeTransport::replying("1");
        let mut client = CommandProtocolClient::new(fake.clone(), fast_options());
        assert!(matches!(client.execute("Beep;"), Err(SxmError::NotConnected)));
        assert!(matches!(client.get_channel(0), Err(SxmError::NotConnected)));
        assert!(fake.programs().is_empty());
    }

    #[test]
    fn test_scan_para_writes_program_and_caches() {
        let fake = FakeTransport::replying("");
        let mut client = connected(&fake);
        client.send_scan_para("Edit23", 0.08).unwrap();

        assert_eq!(
            fake.programs(),
            vec!["begin\r\n  ScanPara('Edit23', 0.08);\r\nend.\r\n".to_string()]
        );
        assert_eq!(client.last_written("EDIT", "Edit23"), Some(0.08));
        assert!(!client.awaiting_answer());
    }

    #[test]
    fn test_invalid_arguments_send_nothing() {
        let fake = FakeTransport::replying("");
        let mut client = connected(&fake);

        assert!(matches!(
            client.send_scan_para("Edit2a", 1.0),
            Err(SxmError::InvalidArgument(_))
        ));
        assert!(client.send_dnc_para(-4, 1.0).is_err());
        assert!(client.feed_para("x'y", 1).is_err());
        assert!(client.set_channel(-1, f64::NAN).is_err());

        assert!(fake.programs().is_empty());
        assert!(client.cache().is_empty());
    }

    #[test]
    fn test_get_channel_parses_comma_decimal() {
        let fake = FakeTransport::replying("12,5");
        let mut client = connected(&fake);
        assert_eq!(client.get_channel(3).unwrap(), Some(12.5));
        assert_eq!(
            fake.programs()[0],
            "begin\r\n  a:=GetChannel(3);\r\n  writeln(a);\r\nend.\r\n"
        );
    }

    #[test]
    fn test_point_separator_is_configurable() {
        let fake = FakeTransport::replying("12.5");
        let options = ClientOptions {
            decimal_separator: DecimalSeparator::Point,
            ..fast_options()
        };
        let mut client = CommandProtocolClient::new(fake.clone(), options);
        client.connect().unwrap();
        assert_eq!(client.get_scan_para("Range").unwrap(), Some(12.5));
    }

    #[test]
    fn test_unparseable_reply_is_none() {
        let fake = FakeTransport::replying("n/a");
        let mut client = connected(&fake);
        assert_eq!(client.read_topography().unwrap(), None);
    }

    #[test]
    fn test_replies_are_matched_in_submission_order() {
        let fake = FakeTransport::default();
        let mut client = connected(&fake);

        let first = client.submit("a:=GetChannel(0);").unwrap();
        let second = client.submit("a:=GetChannel(1);").unwrap();
        fake.push(echo("ok\r\nfirst\r\n"));
        fake.push(echo("ok\r\nsecond\r\n"));

        // Claim out of order
        assert_eq!(client.wait_reply(second).unwrap(), b"ok\r\nsecond\r\n");
        assert_eq!(client.wait_reply(first).unwrap(), b"ok\r\nfirst\r\n");
        assert!(!client.awaiting_answer());
    }

    #[test]
    fn test_timeout_releases_the_request() {
        let fake = FakeTransport::default();
        let mut client = connected(&fake);

        let started = Instant::now();
        let err = client.get_channel(0).unwrap_err();
        assert!(matches!(err, SxmError::TimedOut(_)));
        assert!(started.elapsed() >= Duration::from_millis(50));
        assert_eq!(client.state(), ConnectionState::TimedOut);
        assert!(!client.awaiting_answer());

        // A late echo is drained before the next command goes out
        fake.push(echo("ok\r\nlate\r\n"));
        let id = client.submit("a:=GetChannel(1);").unwrap();
        fake.push(echo("ok\r\n2,5\r\n"));
        assert_eq!(client.wait_reply(id).unwrap(), b"ok\r\n2,5\r\n");
        assert_eq!(client.state(), ConnectionState::Connected);
    }

    #[test]
    fn test_one_lost_echo_does_not_stall_later_reads() {
        let mut programs = 0;
        let fake = FakeTransport::with_responder(move |_| {
            programs += 1;
            (programs > 1).then(|| b"ok\r\n1,5\r\n".to_vec())
        });
        let mut client = connected(&fake);

        assert!(matches!(client.get_channel(0), Err(SxmError::TimedOut(_))));
        for _ in 0..5 {
            assert_eq!(client.get_channel(0).unwrap(), Some(1.5));
        }
        assert_eq!(client.state(), ConnectionState::Connected);
        assert!(!client.awaiting_answer());
    }

    #[test]
    fn test_timeout_drops_older_detached_requests() {
        let fake = FakeTransport::default();
        let mut client = connected(&fake);
        client.execute("Beep;").unwrap();
        assert!(client.awaiting_answer());

        assert!(matches!(client.get_channel(0), Err(SxmError::TimedOut(_))));
        assert!(!client.awaiting_answer());
    }

    #[test]
    fn test_reconnect_after_server_disconnect() {
        let fake = FakeTransport::replying("3,0");
        let mut client = connected(&fake);
        fake.push(DdeEvent::Disconnected);
        client.pump();
        assert_eq!(client.state(), ConnectionState::Disconnected);

        client.connect().unwrap();
        assert!(client.is_connected());
        assert!(fake.state.borrow().registered);
        assert_eq!(client.get_channel(2).unwrap(), Some(3.0));
    }

    #[test]
    fn test_ini_entry_from_reported_file() {
        let mut file = tempfile::Builder::new().suffix(".ini").tempfile().unwrap();
        std::io::Write::write_all(&mut file, b"[Scan]\r\nRange=12,5\r\n").unwrap();

        let fake = FakeTransport::default();
        let reply = format!("{}\r\n\0", file.path().display());
        fake.state
            .borrow_mut()
            .items
            .insert("IniFileName".to_string(), reply.into_bytes());
        let mut client = connected(&fake);

        assert_eq!(
            client.get_ini_entry("Scan", "Range").unwrap().as_deref(),
            Some("12,5")
        );
        assert_eq!(client.get_ini_entry("Scan", "Speed").unwrap(), None);
    }

    #[test]
    fn test_disconnect_event_fails_waiter() {
        let fake = FakeTransport::default();
        let mut client = connected(&fake);
        let id = client.submit("a:=GetChannel(0);").unwrap();
        fake.push(DdeEvent::Disconnected);

        assert!(matches!(client.wait_reply(id), Err(SxmError::NotConnected)));
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert!(matches!(client.execute("Beep;"), Err(SxmError::NotConnected)));
    }

    #[test]
    fn test_rejected_submission_is_not_queued() {
        let fake = FakeTransport::default();
        fake.state.borrow_mut().reject_submits = true;
        let mut client = connected(&fake);

        let err = client.send_scan_para("Edit23", 0.08).unwrap_err();
        assert!(matches!(err, SxmError::CommandRejected { code: 0x4005, .. }));
        assert!(!client.awaiting_answer());
        assert_eq!(client.last_written("EDIT", "Edit23"), None);
    }

    #[test]
    fn test_detached_execute_consumes_its_echo() {
        let fake = FakeTransport::replying("");
        let mut client = connected(&fake);
        client.execute("Beep;").unwrap();
        assert!(client.awaiting_answer());
        assert!(client.pump());
        assert!(!client.awaiting_answer());
        assert_eq!(client.last_answer(), Some(&b"ok\r\n\r\n"[..]));
    }

    #[test]
    fn test_advisories_reach_handler() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let fake = FakeTransport::default();
        let mut client =
            CommandProtocolClient::new(fake.clone(), fast_options()).with_handler(tx);
        client.connect().unwrap();

        fake.push(DdeEvent::AdviseData {
            topic: "Scan".to_string(),
            payload: b"Scan on".to_vec(),
        });
        fake.push(DdeEvent::AdviseData {
            topic: "SaveFileName".to_string(),
            payload: b"img.sxm\r\n".to_vec(),
        });
        client.pump();

        assert_eq!(client.scanning(), Some(true));
        let kinds: Vec<_> = rx.try_iter().map(|n| n.kind).collect();
        assert_eq!(
            kinds,
            vec![
                NotificationKind::ScanState { scanning: true },
                NotificationKind::SaveFileName {
                    file_name: "img.sxm".to_string()
                },
            ]
        );
    }

    #[test]
    fn test_unknown_request_id() {
        let fake = FakeTransport::default();
        let mut client = connected(&fake);
        assert!(matches!(client.wait_reply(42), Err(SxmError::Protocol(_))));
    }

    #[test]
    fn test_plain_request() {
        let fake = FakeTransport::default();
        fake.state
            .borrow_mut()
            .items
            .insert("Version".to_string(), b"3.1\0".to_vec());
        let mut client = connected(&fake);
        assert_eq!(client.request("Version").unwrap(), b"3.1\0");
        assert!(matches!(
            client.request("Nope"),
            Err(SxmError::CommandRejected { .. })
        ));
    }
}
