//! Outcome parsing
//!
//! Extracts pass/fail counts from test-runner output and folds per-command
//! outcomes into one [`VerificationResult`].

use nightingale_adapters::util::tail_chars;
use nightingale_core::{AttemptFailure, CommandOutcome, FailureKind, TestCounts, VerificationResult};
use regex::Regex;
use std::sync::OnceLock;

fn cached(cell: &'static OnceLock<Option<Regex>>, pattern: &str) -> Option<&'static Regex> {
    cell.get_or_init(|| Regex::new(pattern).ok()).as_ref()
}

fn cargo_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    cached(&RE, r"test result: \w+\. (\d+) passed; (\d+) failed")
}

fn jest_line_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    cached(&RE, r"(?m)^\s*Tests:\s+(.*\d+ total.*)$")
}

fn unittest_ran_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    cached(&RE, r"(?m)^Ran (\d+) tests? in ")
}

fn unittest_failed_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    cached(&RE, r"(?m)^FAILED \(([^)]*)\)")
}

fn go_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    cached(&RE, r"(?m)^\s*--- (PASS|FAIL): ")
}

fn pytest_summary_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    cached(&RE, r"(?m)^[=\s]*(\d+ (?:passed|failed|errors?).*) in [\d.]+s")
}

/// `<n> <label>` pairs inside a summary line.
fn counted_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    cached(&RE, r"(\d+) (passed|failed|errors?|total)")
}

fn keyed_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    cached(&RE, r"(failures|errors)=(\d+)")
}

fn number(s: &str) -> u32 {
    s.parse().unwrap_or(0)
}

/// Test counts from a recognised report format, or `None` for anything else.
pub fn parse_test_counts(output: &str) -> Option<TestCounts> {
    parse_cargo(output)
        .or_else(|| parse_jest(output))
        .or_else(|| parse_unittest(output))
        .or_else(|| parse_go(output))
        .or_else(|| parse_pytest(output))
}

fn parse_cargo(output: &str) -> Option<TestCounts> {
    cargo_re()?
        .captures_iter(output)
        .map(|caps| TestCounts::new(number(&caps[1]), number(&caps[2])))
        .reduce(TestCounts::merge)
}

fn parse_jest(output: &str) -> Option<TestCounts> {
    let line = jest_line_re()?.captures_iter(output).last()?;
    let mut passed = 0;
    let mut failed = 0;
    let mut total = None;
    for caps in counted_re()?.captures_iter(&line[1]) {
        let n = number(&caps[1]);
        match &caps[2] {
            "passed" => passed = n,
            "failed" => failed = n,
            "total" => total = Some(n),
            _ => {}
        }
    }
    Some(TestCounts {
        passed,
        failed,
        total: total.unwrap_or(passed + failed),
    })
}

fn parse_unittest(output: &str) -> Option<TestCounts> {
    let ran = number(&unittest_ran_re()?.captures_iter(output).last()?[1]);
    let keyed = keyed_re()?;
    let failed = unittest_failed_re()?
        .captures_iter(output)
        .last()
        .map(|caps| {
            keyed
                .captures_iter(&caps[1])
                .map(|kv| number(&kv[2]))
                .sum::<u32>()
        })
        .unwrap_or(0)
        .min(ran);
    Some(TestCounts {
        passed: ran - failed,
        failed,
        total: ran,
    })
}

fn parse_go(output: &str) -> Option<TestCounts> {
    let mut counts: Option<TestCounts> = None;
    for caps in go_re()?.captures_iter(output) {
        let one = if &caps[1] == "PASS" {
            TestCounts::new(1, 0)
        } else {
            TestCounts::new(0, 1)
        };
        counts = Some(counts.map_or(one, |c| c.merge(one)));
    }
    counts
}

fn parse_pytest(output: &str) -> Option<TestCounts> {
    let line = pytest_summary_re()?.captures_iter(output).last()?;
    let mut passed = 0;
    let mut failed = 0;
    for caps in counted_re()?.captures_iter(&line[1]) {
        let n = number(&caps[1]);
        match &caps[2] {
            "passed" => passed += n,
            "failed" | "error" | "errors" => failed += n,
            _ => {}
        }
    }
    Some(TestCounts::new(passed, failed))
}

/// Fold command outcomes into a verification result.
///
/// `success` requires at least one started command, every command exiting 0
/// without timing out, and no reported test failures.
pub fn summarize(
    commands: Vec<CommandOutcome>,
    output: &str,
    duration_ms: u64,
    output_tail_chars: usize,
) -> VerificationResult {
    let counts = commands
        .iter()
        .filter_map(|c| c.counts)
        .fold(TestCounts::default(), TestCounts::merge);
    let executed = commands.iter().any(CommandOutcome::started);
    let success = executed && commands.iter().all(CommandOutcome::succeeded) && counts.failed == 0;
    let failure = commands.iter().find(|c| c.timed_out).map(|c| {
        AttemptFailure::new(
            FailureKind::CommandTimeout,
            format!("command timed out: {}", c.command),
        )
    });

    VerificationResult {
        passed: counts.passed,
        failed: counts.failed,
        total: counts.total,
        output: tail_chars(output, output_tail_chars),
        duration_ms,
        success,
        executed,
        commands,
        failure,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_pytest_summaries() {
        let out = "tests/test_calc.py .F\n=========== 1 failed, 1 passed in 0.12s ===========\n";
        assert_eq!(parse_test_counts(out), Some(TestCounts::new(1, 1)));
        let quiet = "..\n2 passed in 0.01s\n";
        assert_eq!(parse_test_counts(quiet), Some(TestCounts::new(2, 0)));
        let errors = "==== 3 passed, 2 errors in 1.50s ====";
        assert_eq!(parse_test_counts(errors), Some(TestCounts::new(3, 2)));
    }

    #[test]
    fn parses_unittest() {
        let ok = "...\n----------------------------------------------------------------------\nRan 3 tests in 0.001s\n\nOK\n";
        assert_eq!(parse_test_counts(ok), Some(TestCounts::new(3, 0)));
        let failed = "Ran 4 tests in 0.002s\n\nFAILED (failures=1, errors=1)\n";
        assert_eq!(parse_test_counts(failed), Some(TestCounts::new(2, 2)));
    }

    #[test]
    fn parses_jest() {
        let out = "Test Suites: 1 failed, 1 total\nTests:       1 failed, 2 passed, 3 total\nTime: 1.2s\n";
        assert_eq!(
            parse_test_counts(out),
            Some(TestCounts {
                passed: 2,
                failed: 1,
                total: 3
            })
        );
    }

    #[test]
    fn sums_cargo_binaries() {
        let out = "test result: ok. 3 passed; 0 failed; 0 ignored\n\
                   test result: FAILED. 1 passed; 2 failed; 0 ignored\n";
        assert_eq!(parse_test_counts(out), Some(TestCounts::new(4, 2)));
    }

    #[test]
    fn counts_go_results() {
        let out = "=== RUN   TestAdd\n--- PASS: TestAdd (0.00s)\n--- FAIL: TestSub (0.00s)\n    --- PASS: TestSub/zero (0.00s)\nFAIL\n";
        assert_eq!(parse_test_counts(out), Some(TestCounts::new(2, 1)));
    }

    #[test]
    fn unknown_output_has_no_counts() {
        assert_eq!(parse_test_counts("Compiling widgets\nBuild finished\n"), None);
        assert_eq!(parse_test_counts(""), None);
    }

    fn outcome(exit: Option<i32>, counts: Option<TestCounts>) -> CommandOutcome {
        CommandOutcome {
            command: "x".to_string(),
            exit_code: exit,
            timed_out: false,
            spawn_error: None,
            duration_ms: 1,
            counts,
        }
    }

    #[test]
    fn summary_requires_clean_commands() {
        let ok = summarize(
            vec![outcome(Some(0), Some(TestCounts::new(2, 0))), outcome(Some(0), None)],
            "out",
            5,
            100,
        );
        assert!(ok.success && ok.executed);
        assert_eq!((ok.passed, ok.total), (2, 2));

        let lint_failed = summarize(
            vec![outcome(Some(0), Some(TestCounts::new(2, 0))), outcome(Some(1), None)],
            "",
            5,
            100,
        );
        assert!(!lint_failed.success);
        assert_eq!(lint_failed.passed, 2);
    }

    #[test]
    fn summary_of_nothing_is_not_executed() {
        let empty = summarize(Vec::new(), "", 0, 100);
        assert!(!empty.success);
        assert!(!empty.executed);
        assert!(!empty.has_signal());
    }

    #[test]
    fn timeouts_are_recorded() {
        let mut slow = outcome(None, None);
        slow.timed_out = true;
        let result = summarize(vec![slow], "", 60_000, 100);
        assert!(!result.success);
        assert!(result.executed);
        assert_eq!(
            result.failure.map(|f| f.kind),
            Some(FailureKind::CommandTimeout)
        );
    }
}
