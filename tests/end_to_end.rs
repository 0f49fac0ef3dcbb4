//! Cross-component scenarios: queue handoff plus a full EoE tunnel

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use assert_matches::assert_matches;
use bytes::Bytes;
use rand::RngCore;

use ecat_mbx::{
    mbx_prot, EoeConfig, FetchTimeout, Fragmenter, MailboxMessage, MailboxQueue, MailboxTransport,
    Reassembler, Timeout, TransportError,
};

/// Capture log output for the duration of a test, filtered by `RUST_LOG`
fn subscribe() -> tracing::subscriber::DefaultGuard {
    let sub = tracing_subscriber::FmtSubscriber::builder()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .finish();
    tracing::subscriber::set_default(sub)
}

#[test]
fn queue_blocks_at_capacity_and_preserves_order() {
    let _guard = subscribe();
    let q = Arc::new(MailboxQueue::new(4));
    for label in ["A", "B", "C", "D"] {
        q.post(label, Timeout::POLL).unwrap();
    }

    // E must block until a fetch frees a slot
    let q2 = Arc::clone(&q);
    let poster = thread::spawn(move || q2.post("E", Timeout::Forever));
    thread::sleep(Duration::from_millis(20));
    assert!(!poster.is_finished());

    assert_eq!(q.fetch(Timeout::Forever), Ok("A"));
    poster.join().unwrap().unwrap();
    for expected in ["B", "C", "D", "E"] {
        assert_eq!(q.fetch(Timeout::Forever), Ok(expected));
    }
    assert_matches!(q.fetch(Timeout::POLL), Err(FetchTimeout));
}

/// Transport that loops outbound fragments straight back into a mailbox
/// queue, tagged as EoE traffic from the slave (a bounce slave, in effect)
struct Loopback {
    queue: Arc<MailboxQueue<MailboxMessage>>,
}

impl MailboxTransport for Loopback {
    fn send(&mut self, slave: u16, datagram: &[u8], timeout: Timeout) -> Result<(), TransportError> {
        self.queue
            .post(
                MailboxMessage {
                    slave,
                    protocol: mbx_prot::EOE,
                    payload: Bytes::copy_from_slice(datagram),
                },
                timeout,
            )
            .map_err(|_| TransportError::Timeout)
    }
}

#[test]
fn three_hundred_byte_frame_in_three_fragments() {
    let _guard = subscribe();
    // 100-byte fragment payloads
    let mut config = EoeConfig::default();
    config.mailbox_len(108);

    let queue = Arc::new(MailboxQueue::new(8));
    let mut fragmenter = Fragmenter::new(1, &config);
    let mut transport = Loopback {
        queue: Arc::clone(&queue),
    };

    let mut frame = vec![0u8; 300];
    rand::thread_rng().fill_bytes(&mut frame);
    fragmenter
        .send(&frame, &mut transport, Timeout::Forever)
        .unwrap();
    assert_eq!(queue.len(), 3);

    let mut reassembler = Reassembler::new(&config);
    let mut delivered = Vec::new();
    while let Ok(msg) = queue.fetch(Timeout::POLL) {
        assert_eq!(msg.slave, 1);
        assert_eq!(msg.protocol, mbx_prot::EOE);
        if let Some(out) = reassembler.consume(msg.payload).unwrap() {
            delivered.push(out);
        }
    }
    assert_eq!(delivered.len(), 1, "frame delivered exactly once");
    assert_eq!(&delivered[0][..], &frame[..]);
}

#[test]
fn consumer_thread_drains_reassembles_and_bridges() {
    let _guard = subscribe();
    // The asynchronous EoE consumer: fetch tagged datagrams from the queue,
    // feed the slave's reassembly context, hand completed frames onward
    let mut config = EoeConfig::default();
    config.mailbox_len(108).rx_buffer_size(2048);

    let queue: Arc<MailboxQueue<MailboxMessage>> = Arc::new(MailboxQueue::new(4));
    let consumer_queue = Arc::clone(&queue);
    let consumer_config = config.clone();
    let consumer = thread::spawn(move || {
        let mut reassembler = Reassembler::new(&consumer_config);
        loop {
            let msg = consumer_queue.fetch(Timeout::Forever).unwrap();
            if let Some(frame) = reassembler.consume(msg.payload).unwrap() {
                return frame;
            }
        }
    });

    let mut frame = vec![0u8; 1400];
    rand::thread_rng().fill_bytes(&mut frame);
    let mut fragmenter = Fragmenter::new(2, &config);
    let mut transport = Loopback {
        queue: Arc::clone(&queue),
    };
    // The queue holds 4 datagrams but the frame needs 14; the send only
    // completes because the consumer drains concurrently
    fragmenter
        .send(&frame, &mut transport, Timeout::Forever)
        .unwrap();

    let delivered = consumer.join().unwrap();
    assert_eq!(&delivered[..], &frame[..]);
}
