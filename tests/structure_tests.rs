//! Load-time structural checks observed through the run loop: a broken
//! program never executes, it prints one diagnostic naming the source line.

use rust_basic::basic::RunOutcome;

mod testrunners;
use testrunners::run_program;

fn load_error(source: &str) -> String {
    match run_program(source).outcome {
        RunOutcome::Errored(message) => message,
        other => panic!("expected a load failure, got {:?}", other),
    }
}

#[test]
fn test_well_formed_program_passes_validation() {
    let result = run_program(
        "FOR I = 1 TO 2\n\
         DO\n\
         WHILE 0\n\
         WEND\n\
         LOOP UNTIL 1\n\
         NEXT I\n\
         IF I = 3 THEN\n\
         PRINT \"three\"\n\
         END IF\n\
         PRINT \"ok\"",
    );
    assert_eq!(result.outcome, RunOutcome::Completed, "{:?}", result.output);
    assert!(result.output.contains("three"));
}

#[test]
fn test_unclosed_for_is_reported_with_its_line() {
    let message = load_error("PRINT 1\nPRINT 2\nFOR I = 1 TO 3\nPRINT I");
    assert!(message.contains("line 3"), "got: {}", message);
    assert!(message.contains("FOR"), "got: {}", message);
    assert!(message.contains("NEXT"), "got: {}", message);
}

#[test]
fn test_mismatched_next_variable() {
    let message = load_error("FOR I = 1 TO 3\nNEXT J");
    assert!(message.contains("NEXT J"), "got: {}", message);
    assert!(message.contains("FOR I"), "got: {}", message);
}

#[test]
fn test_stray_closers() {
    assert!(load_error("WEND").contains("WEND without WHILE"));
    assert!(load_error("LOOP").contains("LOOP without DO"));
    assert!(load_error("NEXT").contains("NEXT without FOR"));
    assert!(load_error("ELSE\nEND IF").contains("ELSE"));
    assert!(load_error("CASE 1").contains("CASE"));
}

#[test]
fn test_duplicate_labels_fail_to_load() {
    let message = load_error("here:\nPRINT 1\nhere:\nPRINT 2");
    assert!(message.contains("duplicate label"), "got: {}", message);
    assert!(message.to_lowercase().contains("here"), "got: {}", message);
}

#[test]
fn test_goto_to_unknown_named_label_fails_to_load() {
    // Named targets are checked up front; the PRINT never runs.
    let result = run_program("GOTO nowhere\nPRINT \"ran\"");
    let RunOutcome::Errored(message) = result.outcome else {
        panic!("expected a load failure");
    };
    assert!(message.contains("nowhere"), "got: {}", message);
    assert!(!result.output.contains("ran"));
}

#[test]
fn test_single_line_if_does_not_need_end_if() {
    let result = run_program("IF 1 THEN PRINT \"inline\"");
    assert_eq!(result.outcome, RunOutcome::Completed);
    assert!(result.output.contains("inline"));
}

#[test]
fn test_exit_outside_a_loop_fails_validation() {
    let message = load_error("EXIT FOR");
    assert!(message.contains("EXIT FOR"), "got: {}", message);
}
