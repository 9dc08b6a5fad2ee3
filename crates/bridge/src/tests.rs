use std::sync::Arc;

use memview_doc::{BufferMemory, Document, DocumentProps, DocumentRegistry, MemoryInterface, Role};
use memview_primitives::{Address, DocId, SessionId, SessionStatus};
use memview_proto::{
	CommandKind, CommandPayload, DocumentSettings, Frame, GetMemory, GetStartAddress, ResponsePayload,
	SetByte, SetCurrentDoc, write_frame,
};
use pretty_assertions::assert_eq;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

use crate::{BridgeError, HostEndpoint, UiClient, UiSession, run_pump};

const BASE: Address = Address(0x1000);

fn image(len: usize) -> Vec<u8> {
	(0..len).map(|i| i as u8).collect()
}

struct Host {
	mem: Arc<BufferMemory>,
	registry: Arc<DocumentRegistry>,
}

fn host() -> Host {
	let mem = Arc::new(BufferMemory::new(BASE, image(256)).with_symbol("buf", 0x1020));
	let memory: Arc<dyn MemoryInterface> = mem.clone();
	Host {
		mem,
		registry: Arc::new(DocumentRegistry::init(Role::Host, memory)),
	}
}

fn props() -> DocumentProps {
	let mut props = DocumentProps::new("buf", BASE, 64);
	props.columns = 4;
	props.session_id = Some(SessionId::from("s1"));
	props.session_name = "app".to_string();
	props
}

/// Wires a UI session to `registry` over an in-memory byte stream.
fn connect(registry: Arc<DocumentRegistry>) -> Arc<UiSession> {
	let (host_io, ui_io) = tokio::io::duplex(64 * 1024);

	let (host_read, host_write) = tokio::io::split(host_io);
	let (host_in_tx, host_in_rx) = mpsc::unbounded_channel();
	let (host_out_tx, host_out_rx) = mpsc::unbounded_channel();
	tokio::spawn(run_pump(BufReader::new(host_read), host_write, host_in_tx, host_out_rx));
	let endpoint = HostEndpoint::new(registry);
	endpoint.forward_notices(host_out_tx.clone());
	tokio::spawn(endpoint.serve(host_in_rx, host_out_tx));

	let (ui_read, ui_write) = tokio::io::split(ui_io);
	let (ui_in_tx, ui_in_rx) = mpsc::unbounded_channel();
	let (ui_out_tx, ui_out_rx) = mpsc::unbounded_channel();
	tokio::spawn(run_pump(BufReader::new(ui_read), ui_write, ui_in_tx, ui_out_rx));
	let session = Arc::new(UiSession::new(UiClient::new(ui_out_tx)));
	tokio::spawn(Arc::clone(&session).run(ui_in_rx));
	session
}

async fn attached(host: &Host) -> (Arc<Document>, Arc<UiSession>, Arc<Document>) {
	let host_doc = host.registry.create_document(props());
	let ui = connect(Arc::clone(&host.registry));
	assert_eq!(ui.attach().await.unwrap(), 1);
	let ui_doc = ui.registry().current_doc().unwrap();
	assert_eq!(ui_doc.id(), host_doc.id());
	(host_doc, ui, ui_doc)
}

#[tokio::test]
async fn ui_reads_go_through_the_host_once_per_page() {
	let host = host();
	let (_, _ui, ui_doc) = attached(&host).await;

	let byte = ui_doc.get_current_doc_byte(Address(0x1010)).await;
	assert_eq!(byte.cur, Some(0x10));
	assert_eq!(host.mem.reads(), vec![(BASE, 64)]);

	let again = ui_doc.get_current_doc_byte(Address(0x1011)).await;
	assert_eq!(again.cur, Some(0x11));
	assert_eq!(host.mem.read_count(), 1);
}

#[tokio::test]
async fn edits_are_mirrored_only_when_they_change_something() {
	let host = host();
	let (host_doc, ui, ui_doc) = attached(&host).await;
	ui_doc.get_current_doc_byte(BASE).await;

	assert!(ui.set_byte(ui_doc.id(), Address(0x1001), 0x55).unwrap());
	assert!(!ui.set_byte(ui_doc.id(), Address(0x1001), 0x55).unwrap());

	// Commands are handled in order, so a round-trip flushes the edit.
	ui.client().call(CommandPayload::GetDocuments).await.unwrap();
	assert_eq!(host_doc.modified_addresses(), vec![Address(0x1001)]);
	assert_eq!(ui.client().pending(), 0);
}

#[tokio::test]
async fn settings_and_client_state_are_mirrored() {
	let host = host();
	let (host_doc, ui, ui_doc) = attached(&host).await;

	let mut state = memview_proto::ClientState::new();
	state.insert("scroll".to_string(), 3.into());
	ui.save_client_state(ui_doc.id(), state.clone()).unwrap();
	ui.update_settings(
		ui_doc.id(),
		DocumentSettings {
			display_name: Some("renamed".to_string()),
			..Default::default()
		},
	)
	.unwrap();

	ui.client().call(CommandPayload::GetDocuments).await.unwrap();
	assert_eq!(host_doc.client_state(), state);
	assert_eq!(host_doc.display_name(), "renamed");
	assert_eq!(ui_doc.display_name(), "renamed");
}

#[tokio::test]
async fn readonly_and_unknown_documents_reject_edits() {
	let host = host();
	let mut readonly = props();
	readonly.is_readonly = true;
	let doc = host.registry.create_document(readonly);
	let ui = connect(Arc::clone(&host.registry));
	ui.attach().await.unwrap();

	assert!(matches!(
		ui.set_byte(doc.id(), BASE, 1),
		Err(BridgeError::Readonly(id)) if id == *doc.id()
	));
	assert!(matches!(
		ui.set_byte(&DocId::from("nope"), BASE, 1),
		Err(BridgeError::UnknownDocument(_))
	));
}

#[tokio::test]
async fn host_errors_come_back_as_remote_errors() {
	let host = host();
	let (_, ui, _) = attached(&host).await;

	let result = ui
		.client()
		.call(CommandPayload::GetMemory(GetMemory {
			doc_id: DocId::from("nope"),
			addr: BASE,
			count: 4,
		}))
		.await;
	assert!(matches!(result, Err(BridgeError::Remote(msg)) if msg == "unknown document nope"));
}

#[tokio::test]
async fn stop_notices_reach_the_ui_and_enable_re_evaluation() {
	let host = host();
	let (_, ui, ui_doc) = attached(&host).await;

	host.registry.session_started(SessionId::from("s1"), "app", None);
	host.registry.session_stopped(&SessionId::from("s1"));
	for _ in 0..100 {
		if ui_doc.session_status() == SessionStatus::Stopped {
			break;
		}
		tokio::task::yield_now().await;
	}
	assert_eq!(ui_doc.session_status(), SessionStatus::Stopped);
	assert!(ui_doc.is_ready());

	assert_eq!(ui_doc.get_start_address().await, Address(0x1020));
	assert_eq!(ui.registry().len(), 1);
}

#[tokio::test]
async fn host_failures_travel_in_the_response() {
	let host = host();
	let doc = host.registry.create_document(props());
	host.registry.create_document(props());
	let endpoint = HostEndpoint::new(Arc::clone(&host.registry));

	let start = endpoint
		.handle_command(CommandPayload::GetStartAddress(GetStartAddress {
			doc_id: doc.id().clone(),
			expr: "missing".to_string(),
			fallback: "0".to_string(),
		}))
		.await;
	assert!(start.is_err());

	let ack = endpoint
		.handle_command(CommandPayload::SetCurrentDoc(SetCurrentDoc {
			doc_id: doc.id().clone(),
		}))
		.await;
	assert_eq!(ack, Ok(ResponsePayload::Ack));
	assert_eq!(host.registry.current_doc_id().as_ref(), Some(doc.id()));

	let reply = endpoint
		.handle_frame(Frame::Command {
			seq: 7,
			payload: CommandPayload::SetByte(SetByte {
				doc_id: DocId::from("nope"),
				addr: BASE,
				value: 1,
			}),
		})
		.await;
	assert_eq!(
		reply,
		Some(Frame::Response {
			seq: 7,
			command: CommandKind::SetByte,
			result: Err("unknown document nope".to_string()),
		})
	);
}

#[tokio::test]
async fn disconnect_fails_outstanding_calls() {
	let (tx, mut rx) = mpsc::unbounded_channel();
	let client = UiClient::new(tx);
	let call = tokio::spawn({
		let client = client.clone();
		async move { client.call(CommandPayload::GetDocuments).await }
	});

	let sent = rx.recv().await;
	assert!(matches!(sent, Some(Frame::Command { seq: 1, .. })));
	assert_eq!(client.pending(), 1);

	client.disconnect();
	assert!(matches!(call.await.unwrap(), Err(BridgeError::Disconnected)));
	assert_eq!(client.pending(), 0);
}

#[tokio::test]
async fn stray_and_discarded_responses_are_dropped() {
	let (tx, _rx) = mpsc::unbounded_channel();
	let client = UiClient::new(tx);

	client.handle_response(99, CommandKind::GetDocuments, Ok(ResponsePayload::Ack));
	assert_eq!(client.pending(), 0);

	client
		.notify(CommandPayload::SetCurrentDoc(SetCurrentDoc {
			doc_id: DocId::from("a"),
		}))
		.unwrap();
	assert_eq!(client.pending(), 1);
	client.handle_response(1, CommandKind::SetCurrentDoc, Err("unknown document a".to_string()));
	assert_eq!(client.pending(), 0);
}

#[tokio::test]
async fn sending_after_the_pump_is_gone_fails() {
	let (tx, rx) = mpsc::unbounded_channel();
	drop(rx);
	let client = UiClient::new(tx);
	assert!(matches!(client.call(CommandPayload::GetDocuments).await, Err(BridgeError::Disconnected)));
	assert_eq!(client.pending(), 0);
}

#[tokio::test]
async fn pump_skips_invalid_frames() {
	let (mut peer, local) = tokio::io::duplex(4096);
	let (read, write) = tokio::io::split(local);
	let (in_tx, mut in_rx) = mpsc::unbounded_channel();
	let (_out_tx, out_rx) = mpsc::unbounded_channel();
	let pump = tokio::spawn(run_pump(BufReader::new(read), write, in_tx, out_rx));

	let valid = Frame::Command {
		seq: 2,
		payload: CommandPayload::GetDocuments,
	};
	peer.write_all(b"garbage\n").await.unwrap();
	peer.write_all(b"{\"type\":\"command\",\"seq\":1,\"command\":\"bogus\",\"body\":null}\n")
		.await
		.unwrap();
	write_frame(&mut peer, &valid).await.unwrap();
	drop(peer);

	assert!(pump.await.unwrap().is_ok());
	assert_eq!(in_rx.recv().await, Some(valid));
	assert_eq!(in_rx.recv().await, None);
}
