//! End-to-end scenarios: whole programs observed through the framebuffer,
//! the input queue and the PRINT hook.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rust_basic::basic::{Interpreter, RunOutcome};
use rust_basic::input::{KeyCode, KeyEvent};
use rust_basic::sound::NullSoundDriver;

mod testrunners;
use testrunners::{new_emu, run_program, run_program_on, type_line};

#[test]
fn test_pset_writes_exactly_one_pixel() {
    let result = run_program("SCREEN 13\nPSET 10, 10, 1");
    let emu = result.emu.lock().unwrap();

    assert_eq!(emu.read_pixel_at(10, 10).unwrap(), 1);
    let lit = emu.frame().iter().filter(|&&p| p != 0).count();
    assert_eq!(lit, 1, "every other pixel must remain 0");
}

#[test]
fn test_line_statement_draws_diagonal() {
    let result = run_program("SCREEN 13\nLINE (0,0)-(10,10), 15");
    let emu = result.emu.lock().unwrap();
    assert_eq!(emu.read_pixel_at(5, 5).unwrap(), 15);
    for i in 0..=10 {
        assert_eq!(emu.read_pixel_at(i, i).unwrap(), 15);
    }
}

#[test]
fn test_view_clips_line_statement() {
    let result = run_program("SCREEN 13\nVIEW (8,8)-(15,15)\nLINE 0, 0, 31, 31, 2");
    let emu = result.emu.lock().unwrap();
    assert_eq!(emu.read_pixel_at(2, 2).unwrap(), 0, "outside the view");
    assert_eq!(emu.read_pixel_at(10, 10).unwrap(), 2, "inside the view");
}

#[test]
fn test_bsave_bload_program_round_trip() {
    let path = std::env::temp_dir().join(format!("rust_basic_e2e_{}.bin", std::process::id()));
    let program = format!(
        "SCREEN 13\n\
         PSET 1, 1, 6\n\
         BSAVE \"{p}\", 0, 64000\n\
         CLS\n\
         BLOAD \"{p}\", 0",
        p = path.display()
    );
    let result = run_program(&program);
    assert_eq!(result.outcome, RunOutcome::Completed, "{:?}", result.output);
    let emu = result.emu.lock().unwrap();
    assert_eq!(emu.read_pixel_at(1, 1).unwrap(), 6);
    let _ = std::fs::remove_file(&path);
}

#[test]
fn test_inkey_polling_loop_terminates_on_key() {
    let emu = new_emu();
    let queue = emu.lock().unwrap().input();

    let mut interpreter = Interpreter::new(Arc::clone(&emu), Box::new(NullSoundDriver::new()));
    interpreter.set_speed_factor(10_000.0);

    let worker = std::thread::spawn(move || {
        interpreter.run("10 IF INKEY$ <> \"\" THEN END\nGOTO 10")
    });

    queue.inject(KeyEvent::down(KeyCode::Enter, Some('\n')));

    // The loop must notice the key promptly.
    let deadline = Instant::now() + Duration::from_secs(2);
    while !worker.is_finished() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    assert!(worker.is_finished(), "program failed to react to the key");
    assert_eq!(worker.join().unwrap(), RunOutcome::Completed);
}

#[test]
fn test_assigning_to_len_reports_reserved_keyword() {
    let result = run_program("LEN = 5");
    let RunOutcome::Errored(message) = result.outcome else {
        panic!("expected an error outcome");
    };
    assert!(message.contains("reserved keyword"), "got: {}", message);
    assert!(message.contains("LEN"), "got: {}", message);
}

#[test]
fn test_guessing_game_over_line_input() {
    let emu = new_emu();
    // The "user" types a wrong guess, then the right one. Events sit in the
    // queue before the program starts; the FIFO preserves them.
    type_line(&emu, "30");
    type_line(&emu, "50");

    let program = "\
secret = 50
again:
LINE INPUT \"Guess: \"; g$
IF VAL(g$) = secret THEN GOTO done
GOTO again
done:
PRINT \"You got it!\"";

    let result = run_program_on(program, emu);
    assert_eq!(result.outcome, RunOutcome::Completed, "{:?}", result.output);
    assert!(
        result.output.contains("You got it!"),
        "missing win message, output: {:?}",
        result.output
    );
}

#[test]
fn test_input_statement_splits_fields() {
    let emu = new_emu();
    type_line(&emu, "3,4");
    let result = run_program_on(
        "INPUT \"coords\", X, Y\nPRINT X + Y",
        emu,
    );
    assert_eq!(result.outcome, RunOutcome::Completed, "{:?}", result.output);
    assert!(result.output.contains("7\r\n"), "output: {:?}", result.output);
}

#[test]
fn test_input_string_and_missing_fields() {
    let emu = new_emu();
    type_line(&emu, "hello");
    let result = run_program_on("INPUT \"say\"; W$, N\nPRINT W$; N", emu);
    assert_eq!(result.outcome, RunOutcome::Completed, "{:?}", result.output);
    // The missing numeric field reads as 0.
    assert!(result.output.contains("hello0\r\n"), "{:?}", result.output);
}

#[test]
fn test_cancellation_is_silent() {
    let emu = new_emu();
    let output = Arc::new(Mutex::new(String::new()));
    let sink = Arc::clone(&output);

    let mut interpreter = Interpreter::new(Arc::clone(&emu), Box::new(NullSoundDriver::new()));
    interpreter.set_print_hook(Box::new(move |s| sink.lock().unwrap().push_str(s)));
    let cancel = interpreter.cancel_token();

    let worker = std::thread::spawn(move || interpreter.run("10 GOTO 10"));
    std::thread::sleep(Duration::from_millis(50));
    cancel.cancel();

    assert_eq!(worker.join().unwrap(), RunOutcome::Cancelled);
    assert!(
        output.lock().unwrap().is_empty(),
        "cancellation must not print a diagnostic"
    );
}

#[test]
fn test_sleep_scales_with_speed_factor() {
    let start = Instant::now();
    let result = run_program("SLEEP 2\nPRINT \"woke\"");
    assert_eq!(result.outcome, RunOutcome::Completed);
    assert!(result.output.contains("woke"));
    // 2 seconds of program time at speed factor 10000 is well under a second.
    assert!(
        start.elapsed() < Duration::from_secs(1),
        "speed factor failed to scale SLEEP"
    );
}
