//! Multi-rank behavior over the in-process mesh backend.

use std::thread;

use parcomm::collective::{SystemOperation, UserOperation};
use parcomm::topology::Color;
use parcomm::{multi_process, traits::*, Universe};

/// Run `body` once per rank, each on its own thread over a shared mesh.
fn on_each_rank<F>(size: usize, body: F)
where
    F: Fn(Universe) + Send + Sync + 'static,
{
    let _ = env_logger::builder().is_test(true).try_init();
    let body = std::sync::Arc::new(body);
    let handles: Vec<_> = multi_process(size)
        .into_iter()
        .map(|universe| {
            let body = std::sync::Arc::clone(&body);
            thread::spawn(move || body(universe))
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
}

#[test]
fn ring_send_passes_every_rank() {
    on_each_rank(4, |universe| {
        let world = universe.world();
        let rank = world.rank();
        let size = world.size();
        let next = world.process_at_rank((rank + 1) % size);
        let previous = world.process_at_rank((rank + size - 1) % size);

        next.send(&rank).unwrap();
        let (value, status) = previous.receive::<i32>().unwrap();
        assert_eq!(value, previous.rank());
        assert_eq!(status.source_rank(), previous.rank());
    });
}

#[test]
fn messages_between_a_pair_arrive_in_send_order() {
    on_each_rank(2, |universe| {
        let world = universe.world();
        if world.rank() == 0 {
            for value in 0u64..16 {
                world.process_at_rank(1).send_with_tag(&value, 5).unwrap();
            }
        } else {
            for expect in 0u64..16 {
                let (value, _) = world.process_at_rank(0).receive_with_tag::<u64>(5).unwrap();
                assert_eq!(value, expect);
            }
        }
    });
}

#[test]
fn wildcard_receive_collects_from_all_ranks() {
    on_each_rank(4, |universe| {
        let world = universe.world();
        if world.rank() == 0 {
            let mut seen = vec![false; world.size() as usize];
            seen[0] = true;
            for _ in 1..world.size() {
                let (value, status) = world.any_process().receive::<i32>().unwrap();
                assert_eq!(value, status.source_rank());
                seen[value as usize] = true;
            }
            assert!(seen.iter().all(|&s| s));
        } else {
            world.process_at_rank(0).send(&world.rank()).unwrap();
        }
    });
}

#[test]
fn isend_irecv_round_trip() {
    on_each_rank(2, |universe| {
        let world = universe.world();
        if world.rank() == 0 {
            let payload = [2.5f64, 3.5];
            let request = world.process_at_rank(1).immediate_send(&payload[..]).unwrap();
            request.wait();
        } else {
            let mut incoming = [0.0f64; 2];
            let status = world
                .process_at_rank(0)
                .immediate_receive_into(&mut incoming[..])
                .wait()
                .unwrap();
            assert_eq!(status.count(), 2);
            assert_eq!(incoming, [2.5, 3.5]);
        }
    });
}

#[test]
fn broadcast_reaches_every_member() {
    on_each_rank(3, |universe| {
        let world = universe.world();
        let root = world.process_at_rank(1);
        let mut data = if world.rank() == 1 {
            vec![10i32, 20, 30]
        } else {
            vec![0i32; 3]
        };
        root.broadcast_into(&mut data[..]).unwrap();
        assert_eq!(data, vec![10, 20, 30]);
    });
}

#[test]
fn repeated_broadcast_yields_the_same_result() {
    on_each_rank(3, |universe| {
        let world = universe.world();
        let root = world.process_at_rank(0);
        let input = [7i32, 8, 9];
        let mut first = if world.rank() == 0 { input } else { [0i32; 3] };
        root.broadcast_into(&mut first[..]).unwrap();
        let mut second = if world.rank() == 0 { input } else { [0i32; 3] };
        root.broadcast_into(&mut second[..]).unwrap();
        assert_eq!(first, input);
        assert_eq!(second, first);
    });
}

#[test]
fn packed_broadcast() {
    on_each_rank(2, |universe| {
        let world = universe.world();
        let root = world.process_at_rank(0);
        let mut label = if world.rank() == 0 {
            String::from("shared state")
        } else {
            String::new()
        };
        root.broadcast_into(&mut label).unwrap();
        assert_eq!(label, "shared state");
    });
}

#[test]
fn sum_reduction_lands_at_the_root() {
    on_each_rank(4, |universe| {
        let world = universe.world();
        let contribution = [world.rank(), 1];
        let root = world.process_at_rank(0);
        if world.rank() == 0 {
            let mut total = [0i32; 2];
            root.reduce_into_root(&contribution[..], &mut total[..], SystemOperation::sum())
                .unwrap();
            assert_eq!(total, [6, 4]);
        } else {
            root.reduce_into(&contribution[..], SystemOperation::sum())
                .unwrap();
        }
    });
}

#[test]
fn noncommutative_reduction_folds_in_rank_order() {
    on_each_rank(3, |universe| {
        let world = universe.world();
        // Base-ten digit concatenation is associative enough for a fold
        // but visibly order-dependent.
        let concat = UserOperation::associative(|a: i32, b: i32| a * 10 + b);
        let digit = world.rank() + 1;
        let root = world.process_at_rank(2);
        if world.rank() == 2 {
            let mut out = 0i32;
            root.reduce_into_root(&digit, &mut out, &concat).unwrap();
            assert_eq!(out, 123);
        } else {
            root.reduce_into(&digit, &concat).unwrap();
        }
    });
}

#[test]
fn barrier_orders_cross_rank_effects() {
    let (tx, rx) = crossbeam_channel::unbounded::<&'static str>();
    on_each_rank(3, move |universe| {
        let world = universe.world();
        let tx = tx.clone();
        tx.send("before").unwrap();
        world.barrier().unwrap();
        tx.send("after").unwrap();
        world.barrier().unwrap();
    });
    let events: Vec<_> = rx.try_iter().collect();
    assert_eq!(events.len(), 6);
    // Every "before" precedes every "after".
    assert!(events[..3].iter().all(|&e| e == "before"));
    assert!(events[3..].iter().all(|&e| e == "after"));
}

#[test]
fn split_partitions_and_reorders() {
    on_each_rank(6, |universe| {
        let world = universe.world();
        let rank = world.rank();
        // Two groups of three; the key reverses each group's order.
        let color = Color::with_value(rank % 2);
        let sub = world
            .split_by_color_with_key(color, -rank)
            .unwrap()
            .unwrap();
        assert_eq!(sub.size(), 3);
        // Group members in world rank order are (r, r+2, r+4); reversed
        // by the key the highest world rank becomes rank zero.
        let expected = (2 - rank / 2) as i32;
        assert_eq!(sub.rank(), expected);

        // The subgroup is a working communicator.
        let total_expected = if rank % 2 == 0 { 6 } else { 9 };
        let sub_root = sub.process_at_rank(0);
        if sub.rank() == 0 {
            let mut total = 0i32;
            sub_root
                .reduce_into_root(&rank, &mut total, SystemOperation::sum())
                .unwrap();
            assert_eq!(total, total_expected);
        } else {
            sub_root.reduce_into(&rank, SystemOperation::sum()).unwrap();
        }
    });
}

#[test]
fn split_excludes_undefined_color() {
    on_each_rank(3, |universe| {
        let world = universe.world();
        let color = if world.rank() == 1 {
            Color::undefined()
        } else {
            Color::with_value(0)
        };
        let sub = world.split_by_color(color).unwrap();
        if world.rank() == 1 {
            assert!(sub.is_none());
        } else {
            let sub = sub.unwrap();
            assert_eq!(sub.size(), 2);
            // World order carries over when keys are equal.
            let expected = if world.rank() == 0 { 0 } else { 1 };
            assert_eq!(sub.rank(), expected);
        }
    });
}

#[test]
fn duplicated_group_traffic_is_insulated() {
    on_each_rank(2, |universe| {
        let world = universe.world();
        let copy = world.duplicate().unwrap();
        assert_eq!(copy.rank(), world.rank());
        assert_eq!(copy.size(), world.size());
        if world.rank() == 0 {
            world.process_at_rank(1).send_with_tag(&1u8, 4).unwrap();
            copy.process_at_rank(1).send_with_tag(&2u8, 4).unwrap();
        } else {
            // Same source and tag; only the context tells the messages
            // apart.
            let (on_copy, _) = copy.process_at_rank(0).receive_with_tag::<u8>(4).unwrap();
            assert_eq!(on_copy, 2);
            let (on_world, _) = world.process_at_rank(0).receive_with_tag::<u8>(4).unwrap();
            assert_eq!(on_world, 1);
        }
    });
}
