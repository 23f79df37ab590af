use super::*;
use crate::errors::LooperError;
use crate::queue::TaskQueue;
use crate::runtime::identity::{CallingIdentity, restore_calling_identity};
use crate::task::{SharedCallback, Tag};
use crate::test_utils::{CaptureLayer, Recorder, init_tracing, on_new_thread};
use crate::trace::{Printer, StringPrinter};
use anyhow::Result;
use static_assertions::assert_impl_all;
use std::panic::{AssertUnwindSafe, catch_unwind, resume_unwind};
use std::sync::{Arc, Barrier};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;

assert_impl_all!(Looper: Send, Sync, Clone);
assert_impl_all!(TaskQueue: Send, Sync, Clone);
assert_impl_all!(Handler: Send, Sync, Clone);
assert_impl_all!(LooperThread: Send);
assert_impl_all!(LooperError: Send, Sync);

/// Handler posting a quit for its own looper.
fn post_quit(handler: &Handler) {
    let looper = handler.looper().clone();
    handler.post(move || looper.quit().expect("quit allowed"));
}

#[test]
fn test_prepare_once_per_thread() -> Result<()> {
    on_new_thread(|| -> Result<()> {
        assert!(current().is_none());

        let looper = prepare()?;
        assert_eq!(prepare().err(), Some(LooperError::AlreadyPrepared));
        assert_eq!(
            Builder::new().history_capacity(8).prepare().err(),
            Some(LooperError::AlreadyPrepared)
        );

        // The first registration is untouched.
        assert!(my_looper().ptr_eq(&looper));
        assert!(current().is_some_and(|l| l.ptr_eq(&looper)));
        assert!(looper.history().is_none());
        assert!(looper.is_current_thread());
        assert!(!looper.is_main());
        Ok(())
    })
}

#[test]
#[should_panic(expected = "No Looper; prepare() wasn't called on this thread.")]
fn test_my_looper_without_prepare_panics() {
    on_new_thread(|| {
        my_looper();
    });
}

#[test]
#[should_panic(expected = "No Looper; prepare() wasn't called on this thread.")]
fn test_handler_current_without_prepare_panics() {
    on_new_thread(|| {
        Handler::current();
    });
}

#[test]
fn test_run_dispatches_in_order_until_quit() -> Result<()> {
    let recorder = Recorder::new();

    let rec = recorder.clone();
    on_new_thread(move || -> Result<()> {
        let looper = prepare()?;
        let handler = Handler::current();

        handler.post_delayed(rec.push("late"), Duration::from_millis(20));
        handler.post(rec.push("first"));
        handler.post(rec.push("second"));
        handler.post_delayed(
            {
                let looper = looper.clone();
                move || looper.quit_safely().expect("quit allowed")
            },
            Duration::from_millis(40),
        );

        looper.run()?;

        assert!(!looper.is_running());
        assert!(!handler.post(|| {}));
        Ok(())
    })?;

    assert_eq!(recorder.events(), ["first", "second", "late"]);
    Ok(())
}

#[test]
fn test_run_from_wrong_thread() -> Result<()> {
    let (tx, rx) = mpsc::channel();

    let owner = thread::spawn(move || -> Result<()> {
        let looper = prepare()?;
        tx.send(looper.clone())?;
        Ok(())
    });
    owner.join().expect("owner panicked")?;
    let looper = rx.recv()?;

    let owner_id = looper.thread().id();
    let res = on_new_thread(move || (thread::current().id(), looper.run()));

    match res {
        (actual, Err(LooperError::WrongThread { expected, actual: got })) => {
            assert_eq!(expected, owner_id);
            assert_eq!(got, actual);
        }
        (_, other) => panic!("unexpected result {other:?}"),
    }
    Ok(())
}

#[test]
fn test_run_is_not_reentrant() -> Result<()> {
    let nested = on_new_thread(|| -> Result<Option<LooperError>> {
        let looper = prepare()?;
        let handler = Handler::new(&looper);
        let (tx, rx) = mpsc::channel();

        handler.post(move || {
            let _ = tx.send(my_looper().run().err());
        });
        post_quit(&handler);

        looper.run()?;
        Ok(rx.recv()?)
    })?;

    assert_eq!(nested, Some(LooperError::AlreadyRunning));
    Ok(())
}

#[test]
fn test_payload_panic_unwinds_and_looper_can_run_again() -> Result<()> {
    let recorder = Recorder::new();

    let rec = recorder.clone();
    on_new_thread(move || -> Result<()> {
        let looper = prepare()?;
        let handler = Handler::new(&looper);

        handler.post(|| panic!("payload failed"));
        handler.post(rec.push("after-panic"));

        let res = catch_unwind(AssertUnwindSafe(|| looper.run()));
        assert!(res.is_err());
        assert!(!looper.is_running());

        post_quit(&handler);
        looper.run()?;
        Ok(())
    })?;

    assert_eq!(recorder.events(), ["after-panic"]);
    Ok(())
}

// The main looper is process-wide and can be prepared once, so this is the only
// test touching it.
#[test]
fn test_main_looper() -> Result<()> {
    // A thread that already has a looper can't become main, and doesn't keep
    // another thread from doing so.
    let err = on_new_thread(|| -> Result<Option<LooperError>> {
        prepare()?;
        Ok(prepare_main().err())
    })?;
    assert_eq!(err, Some(LooperError::AlreadyPrepared));
    assert!(main_looper().is_none());

    let start = Arc::new(Barrier::new(4));
    let contenders: Vec<_> = (0..4)
        .map(|_| {
            let start = Arc::clone(&start);
            thread::spawn(move || {
                start.wait();
                (prepare_main(), current())
            })
        })
        .collect();

    let mut winners = Vec::new();
    for contender in contenders {
        let (res, current) = match contender.join() {
            Ok(outcome) => outcome,
            Err(panic) => resume_unwind(panic),
        };
        match res {
            Ok(main) => {
                assert!(current.is_some_and(|l| l.ptr_eq(&main)));
                winners.push(main);
            }
            Err(e) => {
                // Losers must not be left with a looper they can never quit.
                assert_eq!(e, LooperError::MainAlreadyPrepared);
                assert!(current.is_none());
            }
        }
    }
    assert_eq!(winners.len(), 1);
    let main = winners.remove(0);

    assert!(main.is_main());
    assert!(main_looper().is_some_and(|l| l.ptr_eq(&main)));
    assert!(!main.queue().quit_allowed());
    assert_eq!(main.quit(), Err(LooperError::QuitNotAllowed));
    assert_eq!(main.quit_safely(), Err(LooperError::QuitNotAllowed));
    assert!(!main.queue().is_quitting());

    assert_eq!(
        on_new_thread(|| (prepare_main().err(), current().is_none())),
        (Some(LooperError::MainAlreadyPrepared), true)
    );
    Ok(())
}

#[test]
fn test_for_thread_finds_spawned_looper() -> Result<()> {
    let worker = Builder::new().thread_name("registry-lookup").spawn()?;

    let found = for_thread(worker.looper().thread().id());
    assert!(found.is_some_and(|l| l.ptr_eq(worker.looper())));
    assert!(for_thread(thread::current().id()).is_none_or(|l| !l.ptr_eq(worker.looper())));

    worker.quit()?;
    worker.join()?;
    Ok(())
}

#[test]
fn test_spawned_thread_runs_posts() -> Result<()> {
    let worker = Builder::new()
        .thread_name("spawn-test")
        .thread_stack_size(256 * 1024)
        .spawn()?;

    let (tx, rx) = mpsc::channel();
    assert!(worker.handler().post(move || {
        let name = thread::current().name().map(str::to_owned);
        let _ = tx.send(name);
    }));

    assert_eq!(rx.recv()?, Some("spawn-test".to_string()));

    worker.quit_safely()?;
    worker.join()?;
    Ok(())
}

#[test]
fn test_spawn_rejects_unquittable_looper() {
    let res = Builder::new().quit_allowed(false).spawn();
    assert_eq!(res.err(), Some(LooperError::QuitNotAllowed));
}

#[test]
fn test_thread_naming() -> Result<()> {
    // Each builder numbers its own threads.
    let builder_names: Vec<String> = (0..2)
        .map(|_| -> Result<String> {
            let worker = Builder::new().spawn()?;
            let name = worker.looper().thread().name().unwrap_or_default().to_owned();
            worker.quit()?;
            worker.join()?;
            Ok(name)
        })
        .collect::<Result<_>>()?;

    for name in builder_names {
        assert_eq!(name, "looper-0");
    }

    let n = AtomicUsize::new(0);
    let worker = Builder::new()
        .thread_name_fn(move || format!("custom-{}", n.fetch_add(1, Ordering::Relaxed) + 1))
        .spawn()?;
    assert_eq!(worker.looper().thread().name(), Some("custom-1"));
    worker.quit()?;
    worker.join()?;
    Ok(())
}

#[test]
fn test_spawned_thread_panic_resumes_on_join() -> Result<()> {
    let worker = Builder::new().spawn()?;
    worker.handler().post(|| panic!("worker payload failed"));

    let res = catch_unwind(AssertUnwindSafe(|| worker.join()));
    let panic = res.err().expect("join should resume the payload panic");
    assert_eq!(panic.downcast_ref::<&str>(), Some(&"worker payload failed"));
    Ok(())
}

#[test]
fn test_message_logging() -> Result<()> {
    let lines = on_new_thread(|| -> Result<Vec<String>> {
        let looper = prepare()?;
        let handler = Handler::new(&looper).with_name("net");
        let out = Arc::new(StringPrinter::new());

        looper.set_message_logging(Some(out.clone() as Arc<dyn Printer>));
        handler.post_tagged("refresh", || {});
        handler.post({
            let looper = looper.clone();
            move || {
                looper.set_message_logging(None);
                looper.quit().expect("quit allowed");
            }
        });

        looper.run()?;
        Ok(out.lines())
    })?;

    assert_eq!(lines.len(), 4, "{lines:#?}");
    assert!(lines[0].starts_with(">>>>> Dispatching to net#"), "{}", lines[0]);
    assert!(lines[0].ends_with(" closure: refresh"), "{}", lines[0]);
    assert!(lines[1].starts_with("<<<<< Finished to net#"), "{}", lines[1]);
    assert!(lines[1].ends_with(" closure"), "{}", lines[1]);

    // A printer removed by a payload still sees the end of that dispatch.
    assert!(lines[2].ends_with(" closure: -"), "{}", lines[2]);
    assert!(lines[3].starts_with("<<<<< Finished to net#"), "{}", lines[3]);
    Ok(())
}

#[test]
fn test_history_flags_slow_dispatch() -> Result<()> {
    init_tracing();
    let capture = CaptureLayer::new();

    let layer = capture.clone();
    let history = on_new_thread(move || -> Result<Vec<String>> {
        let subscriber = tracing_subscriber::registry().with(layer);

        tracing::subscriber::with_default(subscriber, || -> Result<Vec<String>> {
            let looper = Builder::new()
                .history_capacity(8)
                .latency_threshold(Duration::from_millis(20))
                .prepare()?;
            let handler = Handler::new(&looper).with_name("slow");

            handler.post_tagged("sleepy", || thread::sleep(Duration::from_millis(40)));
            handler.post_tagged("quick", || {});
            post_quit(&handler);
            looper.run()?;

            let out = StringPrinter::new();
            looper.dump_history(&out);
            assert_eq!(out.lines().len(), 3);

            Ok(looper.history().map(|h| h.messages()).unwrap_or_default())
        })
    })?;

    assert_eq!(history.len(), 3, "{history:#?}");
    assert!(history[0].starts_with("WARNING! Wait: "), "{}", history[0]);
    assert!(history[0].contains("tag=sleepy"), "{}", history[0]);
    assert!(history[1].starts_with("Wait: "), "{}", history[1]);
    assert!(history[1].contains("tag=quick"), "{}", history[1]);

    assert_eq!(capture.events_at(Level::WARN), ["slow dispatch"]);
    Ok(())
}

#[test]
fn test_identity_corruption_is_logged_and_loop_continues() -> Result<()> {
    let capture = CaptureLayer::new();
    let recorder = Recorder::new();

    let layer = capture.clone();
    let rec = recorder.clone();
    on_new_thread(move || -> Result<()> {
        let subscriber = tracing_subscriber::registry().with(layer);

        tracing::subscriber::with_default(subscriber, || -> Result<()> {
            let looper = prepare()?;
            let handler = Handler::new(&looper).with_name("binder");

            handler.post(|| restore_calling_identity(CallingIdentity::from_raw(0x2a)));
            handler.post(rec.push("still-running"));
            post_quit(&handler);
            looper.run()?;
            Ok(())
        })
    })?;

    assert_eq!(recorder.events(), ["still-running"]);

    let errors = capture.events_at(Level::ERROR);
    assert_eq!(errors.len(), 1, "{errors:#?}");
    assert!(
        errors[0].starts_with("Thread identity changed from"),
        "{}",
        errors[0]
    );
    assert!(errors[0].contains("to 0x2a"), "{}", errors[0]);
    Ok(())
}

#[test]
fn test_urgent_handler_bypasses_looper_barrier() -> Result<()> {
    let recorder = Recorder::new();

    let rec = recorder.clone();
    on_new_thread(move || -> Result<()> {
        let looper = prepare()?;
        let normal = Handler::new(&looper);
        let urgent = Handler::new_urgent(&looper);

        looper.post_barrier();
        normal.post(rec.push("normal"));
        urgent.post(rec.push("urgent"));
        urgent.post({
            let looper = looper.clone();
            move || looper.quit_safely().expect("quit allowed")
        });

        looper.run()?;
        Ok(())
    })?;

    // The stalled item was discarded on quit.
    assert_eq!(recorder.events(), ["urgent"]);
    Ok(())
}

#[test]
fn test_handler_cancellation_is_scoped() -> Result<()> {
    on_new_thread(|| -> Result<()> {
        let looper = prepare()?;
        let mine = Handler::new(&looper).with_name("mine");
        let other = Handler::new(&looper).with_name("other");
        let refresh = Tag::from("refresh");
        let tick = SharedCallback::new(|| {});

        mine.post_tagged_delayed("refresh", || {}, Duration::from_secs(60));
        mine.post_shared_delayed(&tick, Duration::from_secs(60));
        mine.post_shared(&tick);
        other.post_tagged("refresh", || {});
        other.post_shared(&tick);

        assert!(mine.has_callbacks(&refresh));
        assert!(mine.has_shared(&tick));
        assert_eq!(looper.queue().len(), 5);

        assert_eq!(mine.remove_callbacks(&refresh), 1);
        assert!(!mine.has_callbacks(&refresh));
        assert!(other.has_callbacks(&refresh));

        assert_eq!(mine.remove_shared(&tick), 2);
        assert!(!mine.has_shared(&tick));
        assert!(other.has_shared(&tick));

        mine.post_at_time(|| {}, Instant::now() + Duration::from_secs(60));
        mine.post_at_front(|| {});
        assert_eq!(mine.remove_all(), 2);
        assert!(!mine.has_pending());
        assert!(other.has_pending());
        assert_eq!(looper.queue().len(), 2);
        Ok(())
    })
}

#[test]
fn test_post_with_unbounded_delay_stays_pending() -> Result<()> {
    on_new_thread(|| -> Result<()> {
        let looper = prepare()?;
        let handler = Handler::new(&looper);

        assert!(handler.post_delayed(|| {}, Duration::MAX));
        assert!(handler.post_tagged_delayed("later", || {}, Duration::MAX));
        assert!(handler.has_pending());
        assert!(looper.queue().is_idle());

        assert_eq!(handler.remove_all(), 2);
        Ok(())
    })
}

#[test]
fn test_handler_clones_share_identity() -> Result<()> {
    on_new_thread(|| -> Result<()> {
        let looper = prepare()?;
        let handler = Handler::new(&looper);
        let clone = handler.clone().with_name("renamed");

        assert_eq!(handler.id(), clone.id());
        clone.post_delayed(|| {}, Duration::from_secs(60));
        assert!(handler.has_pending());
        assert_eq!(handler.remove_all(), 1);
        Ok(())
    })
}

#[test]
fn test_dump_looper() -> Result<()> {
    let lines = on_new_thread(|| -> Result<Vec<String>> {
        let looper = Builder::new().history_capacity(2).prepare()?;
        let handler = Handler::new(&looper).with_name("ui");
        handler.post_tagged_delayed("draw", || {}, Duration::from_secs(60));
        let token = looper.post_barrier();

        let out = StringPrinter::new();
        looper.dump(&out, "> ");
        looper.remove_barrier(token)?;
        assert_eq!(
            looper.remove_barrier(token),
            Err(LooperError::BarrierNotFound(token))
        );
        Ok(out.lines())
    })?;

    assert_eq!(lines.len(), 8, "{lines:#?}");
    assert!(lines[0].starts_with("> Looper{"), "{}", lines[0]);
    assert_eq!(lines[1], "> running=false");
    assert!(lines[2].starts_with("> thread="), "{}", lines[2]);
    assert_eq!(lines[3], "> dispatching=none");
    assert!(lines[4].contains("barrier="), "{}", lines[4]);
    assert_eq!(lines[5], ">   WARNING! Item 0 is a barrier");
    assert!(lines[6].contains("target=ui#"), "{}", lines[6]);
    assert!(lines[6].contains("tag=draw"), "{}", lines[6]);
    assert_eq!(
        lines[7],
        ">   (Total items: 2, barriers: 1, blocked: false, quitting: None)"
    );
    Ok(())
}
