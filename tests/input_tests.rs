use std::sync::Arc;
use std::time::Duration;

use rust_basic::emulator::IoEmulator;
use rust_basic::error::EmuError;
use rust_basic::input::{KeyCode, KeyEvent, KeyModifiers};
use rust_basic::scheduler::{CancelToken, Scheduler};

#[test]
fn test_queue_preserves_fifo_order_through_emulator() {
    let emu = IoEmulator::new();
    let codes = [KeyCode::H, KeyCode::E, KeyCode::L, KeyCode::L, KeyCode::O];
    for code in codes {
        emu.inject_key(KeyEvent::down(code, None));
    }
    let mut seen = Vec::new();
    while let Some(ev) = emu.try_read_key() {
        seen.push(ev.code);
    }
    assert_eq!(seen, codes);
}

#[test]
fn test_held_set_and_modifiers() {
    let emu = IoEmulator::new();
    emu.inject_key(
        KeyEvent::down(KeyCode::A, Some('A')).with_modifiers(KeyModifiers::SHIFT),
    );
    assert!(emu.is_key_down(KeyCode::A));
    assert!(emu.input_modifiers().contains(KeyModifiers::SHIFT));

    emu.inject_key(KeyEvent::up(KeyCode::A));
    assert!(!emu.is_key_down(KeyCode::A));
    assert!(emu.input_modifiers().is_empty());
}

#[test]
fn test_mouse_state_is_latest_snapshot() {
    let emu = IoEmulator::new();
    emu.set_mouse_state(10, 20, true, false, false);
    emu.set_mouse_state(15, 25, false, true, false);

    // Programs observe only the newest state; there is no event backlog.
    let mouse = emu.mouse();
    assert_eq!((mouse.x, mouse.y), (15, 25));
    assert!(!mouse.left);
    assert!(mouse.right);
    assert!(!mouse.middle);
}

#[test]
fn test_wait_for_key_cancellation() {
    let emu = Arc::new(IoEmulator::new());
    let cancel = CancelToken::new();

    let canceller = cancel.clone();
    let handle = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(30));
        canceller.cancel();
    });

    let err = emu
        .wait_for_key(&cancel)
        .expect_err("wait must not succeed without a key");
    assert!(matches!(err, EmuError::Cancelled));
    handle.join().unwrap();
}

#[test]
fn test_scheduler_wait_sees_cross_thread_injection() {
    let emu = Arc::new(IoEmulator::new());
    let queue = emu.input();
    let sched = Scheduler::default();

    let producer = Arc::clone(&emu);
    let handle = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(20));
        producer.inject_key(KeyEvent::down(KeyCode::Space, Some(' ')));
    });

    let ev = sched.wait_for_key(&queue, &CancelToken::new()).unwrap();
    assert_eq!(ev.code, KeyCode::Space);
    assert_eq!(ev.ch, Some(' '));
    handle.join().unwrap();
}
