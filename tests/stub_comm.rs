//! Single-process behavior over the stub backend.

use parcomm::collective::{SystemOperation, UserOperation};
use parcomm::point_to_point::DEFAULT_TAG;
use parcomm::topology::{Color, Communicator};
use parcomm::transport::stub::StubTransport;
use parcomm::{packed_equivalence, traits::*, Error, Threading};

fn stub_world() -> Communicator {
    Communicator::from_transport(Box::new(StubTransport::new()))
}

struct LineCapture {
    lines: std::sync::mpsc::Sender<String>,
}

impl parcomm::logger::Listener for LineCapture {
    fn categories(&self) -> parcomm::logger::Categories {
        parcomm::logger::Categories::ALL
    }

    fn report(&mut self, line: &str) {
        let _ = self.lines.send(line.to_string());
    }
}

#[test]
fn initialization_happens_at_most_once() {
    let first = parcomm::initialize();
    assert!(first.is_some());
    assert!(parcomm::initialize().is_none());
    assert!(parcomm::initialize_with_threading(Threading::Multiple).is_none());

    let mut universe = first.unwrap();
    assert_eq!(universe.threading_support(), Threading::Single);
    let world = universe.world();
    assert_eq!(world.rank(), 0);
    assert_eq!(world.size(), 1);

    // Every world handle denotes the same communication context: a send
    // on one is receivable on another.
    let other_world = universe.world();
    world.this_process().send(&5i32).unwrap();
    let (value, _) = other_world.this_process().receive::<i32>().unwrap();
    assert_eq!(value, 5);

    // The universe's logger can be taken and installed as the facade
    // backend, and records arrive at its listeners.
    let logger = universe.take_logger();
    assert_eq!(logger.rank(), 0);
    let (tx, rx) = std::sync::mpsc::channel();
    logger.subscribe(Box::new(LineCapture { lines: tx }));
    logger.install().unwrap();
    log::warn!("low water mark");
    assert_eq!(rx.try_recv().unwrap(), "0 : [warning] low water mark");
    assert_eq!(universe.logger().rank(), 0);
}

#[test]
fn self_send_round_trip() {
    let world = stub_world();
    world.this_process().send_with_tag(&42i32, 7).unwrap();
    let (value, status) = world.this_process().receive_with_tag::<i32>(7).unwrap();
    assert_eq!(value, 42);
    assert_eq!(status.source_rank(), 0);
    assert_eq!(status.tag(), 7);
    assert_eq!(status.count(), 1);
}

#[test]
fn packed_self_send_round_trip() {
    let world = stub_world();
    let message = String::from("over the mailbox");
    world.this_process().send(&message).unwrap();
    let (value, _) = world.any_process().receive::<String>().unwrap();
    assert_eq!(value, message);
}

#[derive(Debug, PartialEq, serde::Serialize, serde::Deserialize)]
struct Sample {
    label: String,
    values: Vec<f64>,
}

packed_equivalence!(Sample);

#[test]
fn derived_struct_travels_packed() {
    assert!(Sample::equivalent_wire_tag().must_be_packed());
    let world = stub_world();
    let sample = Sample {
        label: "measurement".into(),
        values: vec![0.5, -1.5],
    };
    world.this_process().send(&sample).unwrap();
    let (back, _) = world.this_process().receive::<Sample>().unwrap();
    assert_eq!(back, sample);
}

#[test]
fn vector_receive_sizes_from_the_message() {
    let world = stub_world();
    let data = [1u16, 2, 3, 4, 5];
    world.this_process().send(&data[..]).unwrap();
    let (back, status) = world.this_process().receive_vec::<u16>().unwrap();
    assert_eq!(back, data);
    assert_eq!(status.count(), 5);
}

#[test]
fn undersized_receive_buffer_is_a_count_error() {
    let world = stub_world();
    world.this_process().send(&[1.0f64, 2.0, 3.0][..]).unwrap();
    let mut small = [0.0f64; 2];
    let outcome = world.this_process().receive_into(&mut small[..]);
    assert_eq!(
        outcome,
        Err(Error::Count {
            incoming: 3,
            capacity: 2
        })
    );
}

#[test]
fn negative_tags_are_rejected() {
    let world = stub_world();
    assert_eq!(
        world.this_process().send_with_tag(&1i32, -3),
        Err(Error::Tag(-3))
    );
    assert_eq!(
        world.this_process().receive_with_tag::<i32>(-1).unwrap_err(),
        Error::Tag(-1)
    );
}

#[test]
#[should_panic(expected = "out of bounds")]
fn addressing_a_missing_rank_panics() {
    let world = stub_world();
    let _ = world.process_at_rank(1);
}

#[test]
fn send_request_completes_eagerly() {
    let world = stub_world();
    let request = world
        .this_process()
        .immediate_send_with_tag(&9i64, DEFAULT_TAG)
        .unwrap();
    let status = request.wait();
    assert_eq!(status.count(), 1);
    // A send completion has no originating message to name a source for.
    assert_eq!(status.source_rank(), -1);
    let (value, _) = world.this_process().receive::<i64>().unwrap();
    assert_eq!(value, 9);
}

#[test]
fn receive_future_pends_until_a_message_exists() {
    let world = stub_world();
    let any_process = world.any_process();
    let future = any_process.immediate_receive::<u32>();
    let future = match future.test() {
        Err(pending) => pending,
        Ok(_) => panic!("nothing was sent, the future cannot resolve"),
    };
    world.this_process().send(&11u32).unwrap();
    let (value, _) = future.wait().unwrap();
    assert_eq!(value, 11);
}

#[test]
fn receive_request_holds_the_buffer() {
    let world = stub_world();
    let mut slot = 0.0f32;
    let any_process = world.any_process();
    let request = any_process.immediate_receive_into(&mut slot);
    let request = match request.test() {
        Err(pending) => pending,
        Ok(_) => panic!("nothing was sent, the receive cannot complete"),
    };
    world.this_process().send(&2.5f32).unwrap();
    request.wait().unwrap();
    assert_eq!(slot, 2.5);
}

#[test]
fn collectives_degenerate_to_identities() {
    let world = stub_world();
    world.barrier().unwrap();

    let mut data = [3i32, 1, 4];
    world.this_process().broadcast_into(&mut data[..]).unwrap();
    assert_eq!(data, [3, 1, 4]);

    let mut folded = [0i32; 3];
    world
        .this_process()
        .reduce_into_root(&data[..], &mut folded[..], SystemOperation::sum())
        .unwrap();
    assert_eq!(folded, data);

    let concat = UserOperation::associative(|a: i32, b: i32| a * 10 + b);
    let mut out = 0i32;
    world
        .this_process()
        .reduce_into_root(&7i32, &mut out, &concat)
        .unwrap();
    assert_eq!(out, 7);
}

#[test]
fn splitting_a_singleton_group() {
    let world = stub_world();
    let sub = world
        .split_by_color(Color::with_value(0))
        .unwrap()
        .unwrap();
    assert_eq!(sub.rank(), 0);
    assert_eq!(sub.size(), 1);

    let excluded = world.split_by_color(Color::undefined()).unwrap();
    assert!(excluded.is_none());
}

#[test]
fn duplication_yields_an_insulated_group() {
    let world = stub_world();
    let copy = world.duplicate().unwrap();
    assert_eq!(copy.rank(), 0);
    assert_eq!(copy.size(), 1);

    world.this_process().send(&1u8).unwrap();
    // The duplicate has its own mailbox; the pending message stays with
    // the original.
    let copy_any_process = copy.any_process();
    let copy_future = copy_any_process.immediate_receive::<u8>();
    assert!(copy_future.test().is_err());
    let (value, _) = world.any_process().receive::<u8>().unwrap();
    assert_eq!(value, 1);
}

#[test]
fn cloning_duplicates_the_group() {
    let world = stub_world();
    let clone = world.clone();
    assert_eq!(clone.rank(), world.rank());
    assert_eq!(clone.size(), world.size());
}
