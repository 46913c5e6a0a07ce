//! Test-framework detection and failure mapping.
//!
//! The ANALYZING phase looks for build manifests in the cloned tree to
//! pick a test command, runs it in the sandbox, and condenses the output
//! into a [`TestRunSummary`]. Each failing test later becomes one
//! finding at its class path with full confidence and `tests` as the
//! source.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

use crate::models::agent::{TestFailure, TestRunSummary};
use crate::models::finding::{Finding, FindingSource, Severity};

/// Supported test frameworks, in detection order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestFramework {
    Maven,
    Gradle,
    Cargo,
    Npm,
    Pytest,
    Go,
}

impl TestFramework {
    /// Marker files that identify the framework at the repo root.
    fn markers(self) -> &'static [&'static str] {
        match self {
            TestFramework::Maven => &["pom.xml"],
            TestFramework::Gradle => &["build.gradle", "build.gradle.kts"],
            TestFramework::Cargo => &["Cargo.toml"],
            TestFramework::Npm => &["package.json"],
            TestFramework::Pytest => &["pyproject.toml", "pytest.ini", "setup.py"],
            TestFramework::Go => &["go.mod"],
        }
    }

    /// The sandboxed test command.
    pub fn command(self) -> Vec<String> {
        let parts: &[&str] = match self {
            TestFramework::Maven => &["mvn", "-B", "test"],
            TestFramework::Gradle => &["gradle", "test", "--console=plain"],
            TestFramework::Cargo => &["cargo", "test", "--workspace"],
            TestFramework::Npm => &["npm", "test", "--silent"],
            TestFramework::Pytest => &["python", "-m", "pytest", "-q"],
            TestFramework::Go => &["go", "test", "./..."],
        };
        parts.iter().map(|s| s.to_string()).collect()
    }

    pub fn name(self) -> &'static str {
        match self {
            TestFramework::Maven => "maven",
            TestFramework::Gradle => "gradle",
            TestFramework::Cargo => "cargo",
            TestFramework::Npm => "npm",
            TestFramework::Pytest => "pytest",
            TestFramework::Go => "go",
        }
    }

    const ALL: [TestFramework; 6] = [
        TestFramework::Maven,
        TestFramework::Gradle,
        TestFramework::Cargo,
        TestFramework::Npm,
        TestFramework::Pytest,
        TestFramework::Go,
    ];
}

/// Detect the project's test framework from marker files.
///
/// Returns `None` when nothing matches; the caller treats that as "no
/// tests" rather than a failure.
pub fn detect_framework(repo: &Path) -> Option<TestFramework> {
    TestFramework::ALL
        .into_iter()
        .find(|framework| framework.markers().iter().any(|m| repo.join(m).exists()))
}

static MAVEN_TOTALS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Tests run: (\d+), Failures: (\d+), Errors: (\d+), Skipped: (\d+)").unwrap()
});
static MAVEN_FAILURE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\[ERROR\]\s+([\w.$]+)\.(\w+)\b").unwrap());

static GRADLE_TOTALS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d+) tests completed, (\d+) failed(?:, (\d+) skipped)?").unwrap()
});
static GRADLE_FAILURE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^([\w.$]+) > (\w+) FAILED").unwrap());

static CARGO_TOTALS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"test result: \w+\. (\d+) passed; (\d+) failed; (\d+) ignored").unwrap()
});
static CARGO_FAILURE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^test (\S+) \.\.\. FAILED").unwrap());

static JEST_TOTALS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Tests:\s+(?:(\d+) failed, )?(?:(\d+) skipped, )?(?:(\d+) passed, )?(\d+) total")
        .unwrap()
});

static PYTEST_TOTALS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:(\d+) failed)?(?:, )?(?:(\d+) passed)?(?:, )?(?:(\d+) skipped)? in [\d.]+s")
        .unwrap()
});
static PYTEST_FAILURE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^FAILED (\S+?)::(\S+)").unwrap());

static GO_FAILURE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^--- FAIL: (\S+)").unwrap());
static GO_PASS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^--- PASS: (\S+)").unwrap());

/// Condense raw test output into a summary.
pub fn parse_test_output(
    framework: TestFramework,
    stdout: &str,
    stderr: &str,
    duration_ms: u64,
) -> TestRunSummary {
    let combined = format!("{stdout}\n{stderr}");
    let mut summary = TestRunSummary {
        executed: true,
        duration_ms,
        ..TestRunSummary::default()
    };

    match framework {
        TestFramework::Maven => {
            // Take the last totals line (the reactor summary).
            for caps in MAVEN_TOTALS.captures_iter(&combined) {
                summary.total_tests = num(&caps, 1);
                summary.failed = num(&caps, 2) + num(&caps, 3);
                summary.skipped = num(&caps, 4);
            }
            summary.passed = summary
                .total_tests
                .saturating_sub(summary.failed + summary.skipped);
            for caps in MAVEN_FAILURE.captures_iter(&combined) {
                push_failure(&mut summary, format!("{}#{}", &caps[1], &caps[2]));
            }
        }
        TestFramework::Gradle => {
            if let Some(caps) = GRADLE_TOTALS.captures_iter(&combined).last() {
                summary.total_tests = num(&caps, 1);
                summary.failed = num(&caps, 2);
                summary.skipped = num(&caps, 3);
                summary.passed = summary
                    .total_tests
                    .saturating_sub(summary.failed + summary.skipped);
            }
            for caps in GRADLE_FAILURE.captures_iter(&combined) {
                push_failure(&mut summary, format!("{}#{}", &caps[1], &caps[2]));
            }
        }
        TestFramework::Cargo => {
            // Sum every per-target result line.
            for caps in CARGO_TOTALS.captures_iter(&combined) {
                summary.passed += num(&caps, 1);
                summary.failed += num(&caps, 2);
                summary.skipped += num(&caps, 3);
            }
            summary.total_tests = summary.passed + summary.failed + summary.skipped;
            for caps in CARGO_FAILURE.captures_iter(&combined) {
                push_failure(&mut summary, caps[1].to_string());
            }
        }
        TestFramework::Npm => {
            if let Some(caps) = JEST_TOTALS.captures_iter(&combined).last() {
                summary.failed = num(&caps, 1);
                summary.skipped = num(&caps, 2);
                summary.passed = num(&caps, 3);
                summary.total_tests = num(&caps, 4);
            }
        }
        TestFramework::Pytest => {
            if let Some(caps) = PYTEST_TOTALS.captures_iter(&combined).last() {
                summary.failed = num(&caps, 1);
                summary.passed = num(&caps, 2);
                summary.skipped = num(&caps, 3);
                summary.total_tests = summary.passed + summary.failed + summary.skipped;
            }
            for caps in PYTEST_FAILURE.captures_iter(&combined) {
                push_failure(&mut summary, format!("{}#{}", &caps[1], &caps[2]));
            }
        }
        TestFramework::Go => {
            summary.failed = GO_FAILURE.captures_iter(&combined).count() as u64;
            summary.passed = GO_PASS.captures_iter(&combined).count() as u64;
            summary.total_tests = summary.passed + summary.failed;
            for caps in GO_FAILURE.captures_iter(&combined) {
                push_failure(&mut summary, caps[1].to_string());
            }
        }
    }

    summary
}

fn num(caps: &regex::Captures<'_>, idx: usize) -> u64 {
    caps.get(idx)
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0)
}

fn push_failure(summary: &mut TestRunSummary, id: String) {
    if summary.failures.iter().any(|f| f.id == id) {
        return;
    }
    summary.failures.push(TestFailure {
        id,
        message: String::new(),
    });
}

/// Map one failing test to a finding at its class path.
///
/// `com.x.Y#m` becomes a finding on `com/x/Y.java` titled
/// `Test Failed: m`; module-path ids map onto their slash form.
pub fn map_test_failure(framework: TestFramework, failure: &TestFailure) -> Finding {
    let (file, test_name) = match failure.id.split_once('#') {
        Some((scope, name)) => {
            let path = scope.replace('.', "/");
            let file = match framework {
                TestFramework::Maven | TestFramework::Gradle => format!("{path}.java"),
                _ => scope.to_string(),
            };
            (file, name.to_string())
        }
        None => {
            let name = failure
                .id
                .rsplit("::")
                .next()
                .unwrap_or(&failure.id)
                .to_string();
            (failure.id.replace("::", "/"), name)
        }
    };

    let suggestion = if failure.message.is_empty() {
        format!("Test `{}` fails on this change; run it locally and fix the regression.", failure.id)
    } else {
        failure.message.clone()
    };

    Finding {
        file,
        start_line: 1,
        severity: Severity::Critical,
        title: format!("Test Failed: {test_name}"),
        suggestion,
        confidence_score: Some(1.0),
        confidence_explanation: Some("Observed test failure".to_string()),
        suggested_fix: None,
        source: FindingSource::Tests,
    }
}

/// Map every failure in a summary.
pub fn map_test_failures(framework: TestFramework, summary: &TestRunSummary) -> Vec<Finding> {
    summary
        .failures
        .iter()
        .map(|f| map_test_failure(framework, f))
        .collect()
}
