// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Channels between coroutine runs and plain threads.

use std::thread;
use std::time::Duration;

use skein::prelude::*;

fn context() -> CoroutineContext {
    CoroutineContext::with_config(ContextConfig::default().with_workers(4)).unwrap()
}

#[test]
fn receive_step_meets_blocking_sender() {
    let ctx = context();
    let numbers: ChannelId<i32> = ChannelId::new("numbers");
    let doubled = Coroutine::first(receive::<(), i32>(&numbers)).then(apply(|n: i32| n * 2));

    CoroutineScope::launch(&ctx, |scope| {
        let run = doubled.run_async(scope, ());
        scope.channel(&numbers)?.send_blocking(21)?;
        assert_eq!(run.result()?, 42);
        Ok(())
    })
    .unwrap();
}

#[test]
fn send_step_passes_the_value_through() {
    let ctx = context();
    let words: ChannelId<String> = ChannelId::new("words");
    let sender = Coroutine::first(send(&words)).then(apply(|w: String| w.len()));

    CoroutineScope::launch(&ctx, |scope| {
        let run = sender.run_async(scope, "hello".to_string());
        assert_eq!(scope.channel(&words)?.receive_blocking()?, "hello");
        assert_eq!(run.result()?, 5);
        Ok(())
    })
    .unwrap();
}

#[test]
fn coroutines_rendezvous_with_each_other() {
    let ctx = context();
    let pipe: ChannelId<u32> = ChannelId::new("pipe");
    let producer = Coroutine::first(send(&pipe));
    let consumer = Coroutine::first(receive::<(), u32>(&pipe)).then(apply(|n: u32| n + 1));

    CoroutineScope::launch(&ctx, |scope| {
        let got = consumer.run_async(scope, ());
        let sent = producer.run_blocking(scope, 9);
        assert_eq!(sent.result()?, 9);
        assert_eq!(got.result()?, 10);
        Ok(())
    })
    .unwrap();
}

#[test]
fn two_receivers_share_two_values() {
    let ctx = context();
    let id: ChannelId<i32> = ChannelId::new("pair");
    let rx = Coroutine::first(receive::<(), i32>(&id));

    CoroutineScope::launch(&ctx, |scope| {
        let a = rx.run_async(scope, ());
        let b = rx.run_async(scope, ());
        let ch = scope.channel(&id)?;
        let tx = ch.clone();
        let other = thread::spawn(move || tx.send_blocking(1));
        ch.send_blocking(2)?;
        other.join().unwrap()?;

        let mut got = vec![a.result()?, b.result()?];
        got.sort();
        assert_eq!(got, vec![1, 2]);
        Ok(())
    })
    .unwrap();
}

#[test]
fn oldest_sender_is_served_first() {
    let ctx = context();
    let id: ChannelId<i32> = ChannelId::new("queue");

    CoroutineScope::launch(&ctx, |scope| {
        let ch = scope.channel(&id)?;
        let mut senders = Vec::new();
        for v in 1..=3 {
            let tx = ch.clone();
            senders.push(thread::spawn(move || tx.send_blocking(v)));
            thread::sleep(Duration::from_millis(50));
        }
        let got: Vec<i32> = (0..3).map(|_| ch.receive_blocking()).collect::<Result<Vec<i32>, _>>()?;
        assert_eq!(got, vec![1, 2, 3]);
        for s in senders {
            s.join().unwrap()?;
        }
        Ok(())
    })
    .unwrap();
}

#[test]
fn close_wakes_waiting_receivers() {
    let ctx = context();
    let id: ChannelId<i32> = ChannelId::new("doomed");
    let rx = Coroutine::named("rx", receive::<(), i32>(&id));

    CoroutineScope::launch(&ctx, |scope| {
        let waiting = rx.run_async(scope, ());
        thread::sleep(Duration::from_millis(20));
        let ch = scope.channel(&id)?;
        ch.close();
        ch.close();
        assert!(ch.is_closed());

        let err = waiting.result().unwrap_err();
        assert!(err.is_channel_closed());
        assert_eq!(err.to_string(), "channel `doomed` is closed");
        waiting.error_handled();

        assert!(ch.send_blocking(1).unwrap_err().is_channel_closed());
        assert!(ch.try_receive().is_err());
        Ok(())
    })
    .unwrap();
}

#[test]
fn close_wakes_waiting_senders() {
    let ctx = context();
    let id: ChannelId<i32> = ChannelId::new("doomed");
    let tx = Coroutine::first(send(&id));

    CoroutineScope::launch(&ctx, |scope| {
        let waiting = tx.run_async(scope, 5);
        thread::sleep(Duration::from_millis(20));
        scope.channel(&id)?.close();
        assert!(waiting.result().unwrap_err().is_channel_closed());
        waiting.error_handled();
        Ok(())
    })
    .unwrap();
}

#[test]
fn channels_are_per_scope() {
    let ctx = context();
    let id: ChannelId<i32> = ChannelId::new("shared-name");

    CoroutineScope::launch(&ctx, |outer| {
        let outer_ch = outer.channel(&id)?;
        assert!(outer.has_channel(&id));
        CoroutineScope::launch(&ctx, |inner| {
            assert!(!inner.has_channel(&id));
            inner.channel(&id)?.close();
            Ok(())
        })
        .unwrap();
        assert!(!outer_ch.is_closed());
        // Same scope, same id: same channel.
        outer_ch.close();
        assert!(outer.channel(&id)?.is_closed());
        Ok(())
    })
    .unwrap();
}

#[test]
fn channel_name_reused_with_another_type() {
    let ctx = context();
    CoroutineScope::launch(&ctx, |scope| {
        scope.channel(&ChannelId::<i32>::new("mixed"))?;
        let err = scope.channel(&ChannelId::<String>::new("mixed")).unwrap_err();
        assert!(matches!(err, CoroutineError::ChannelType { ref channel } if channel == "mixed"));
        Ok(())
    })
    .unwrap();
}

#[test]
fn continuation_sees_its_scope_channels() {
    let ctx = context();
    let id: ChannelId<i32> = ChannelId::new("seen");
    let c = Coroutine::first(apply(|x: i32| x));

    CoroutineScope::launch(&ctx, |scope| {
        let run = c.run_blocking(scope, 1);
        scope.channel(&id)?.close();
        assert!(run.channel(&id)?.is_closed());
        Ok(())
    })
    .unwrap();
}

#[test]
fn receive_timeout_and_try_receive() {
    let ctx = context();
    let id: ChannelId<i32> = ChannelId::new("slow");

    CoroutineScope::launch(&ctx, |scope| {
        let ch = scope.channel(&id)?;
        assert!(matches!(
            ch.receive_timeout(Duration::from_millis(20)),
            Err(CoroutineError::Timeout)
        ));
        assert_eq!(ch.try_receive()?, None);

        let tx = ch.clone();
        let sender = thread::spawn(move || tx.send_blocking(3));
        assert_eq!(ch.receive_timeout(Duration::from_secs(5))?, 3);
        sender.join().unwrap()?;
        Ok(())
    })
    .unwrap();
}

#[test]
fn channel_knows_its_owning_scope() {
    let ctx = context();
    let id: ChannelId<i32> = ChannelId::new("owned");

    let mut kept = None;
    CoroutineScope::launch(&ctx, |scope| {
        let ch = scope.channel(&id)?;
        assert_eq!(ch.scope().map(|owner| owner.id()), Some(scope.id()));
        kept = Some(ch);
        Ok(())
    })
    .unwrap();
    // The channel does not keep its scope alive.
    assert!(kept.unwrap().scope().is_none());
}
