//! CAT command builders and the command tester.
//!
//! Frames are plain ASCII: a two-letter code, an optional parameter, and a
//! `;` terminator. The builders are pure; [`CatTester`] does the I/O over a
//! [`Channel`] and compares each stripped response with its expected literal.

use std::fmt;

use log::{debug, warn};

use crate::channel::Channel;
use crate::simulator::TERMINATOR;

/// Frequency the standard plan tunes to (20 m FT8 calling frequency).
pub const TEST_FREQUENCY_HZ: u32 = 14_074_000;

/// Builds a frame from a command code and parameter.
pub fn encode_command(code: &str, param: &str) -> String {
    format!("{code}{param}{TERMINATOR}")
}

/// Builds a bare query such as `FA;`.
pub fn cmd_query(code: &str) -> String {
    encode_command(code, "")
}

/// Builds a "set VFO frequency" frame: `FA` plus 9 zero-padded digits in Hz.
pub fn cmd_set_frequency(freq_hz: u32) -> String {
    encode_command("FA", &format!("{freq_hz:09}"))
}

/// Builds an on/off frame such as `TX1;` or `ST0;`.
pub fn cmd_set_flag(code: &str, on: bool) -> String {
    encode_command(code, if on { "1" } else { "0" })
}

/// One command exchange and the response it must produce.
#[derive(Debug, Clone, PartialEq)]
pub struct TestCase {
    /// Heading the case is reported under.
    pub group: &'static str,
    /// Frame written before the query, if any.
    pub set: Option<String>,
    pub query: String,
    pub expected: String,
}

impl TestCase {
    /// A case that only queries.
    pub fn query(group: &'static str, query: impl Into<String>, expected: impl Into<String>) -> Self {
        Self {
            group,
            set: None,
            query: query.into(),
            expected: expected.into(),
        }
    }

    /// A case that sets a value and then reads it back.
    pub fn set_and_query(
        group: &'static str,
        set: impl Into<String>,
        query: impl Into<String>,
        expected: impl Into<String>,
    ) -> Self {
        Self {
            group,
            set: Some(set.into()),
            query: query.into(),
            expected: expected.into(),
        }
    }
}

/// The fixed validation plan for the controller's CAT interface.
///
/// Nine command groups; the on/off groups hold two exchanges each.
pub fn standard_plan(freq_hz: u32) -> Vec<TestCase> {
    let fa_set = cmd_set_frequency(freq_hz);
    let mut plan = vec![TestCase::set_and_query(
        "Frequency Set/Query Test",
        fa_set.clone(),
        cmd_query("FA"),
        fa_set,
    )];

    for (group, code) in [("Transmit Command Test", "TX"), ("Auto Info Test", "AI")] {
        for on in [true, false] {
            plan.push(TestCase::set_and_query(
                group,
                cmd_set_flag(code, on),
                cmd_query(code),
                cmd_set_flag(code, on),
            ));
        }
    }

    plan.extend([
        TestCase::query("Device ID Query", cmd_query("ID"), "ID0650;"),
        TestCase::query("Mode Query", encode_command("MD", "0"), "MD0C;"),
        TestCase::query("Shift Query", encode_command("SH", "0"), "SH0000;"),
        TestCase::query("Narrow Filter Query", encode_command("NA", "0"), "NA00;"),
        TestCase::query(
            "Interface Data Query",
            cmd_query("IF"),
            format!("IF001{freq_hz:09}+000000C00000;"),
        ),
    ]);

    for on in [true, false] {
        plan.push(TestCase::set_and_query(
            "Split Mode Test",
            cmd_set_flag("ST", on),
            cmd_query("ST"),
            cmd_set_flag("ST", on),
        ));
    }

    plan
}

/// What happened when a case was run.
#[derive(Debug, Clone, PartialEq)]
pub struct CaseOutcome {
    pub case: TestCase,
    /// The response with surrounding whitespace stripped. Empty when nothing
    /// arrived.
    pub response: String,
    /// Set when the exchange failed at the I/O level.
    pub error: Option<String>,
    pub passed: bool,
}

impl fmt::Display for CaseOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(set) = &self.case.set {
            write!(f, "Sent: {} | ", set.trim())?;
        }
        write!(
            f,
            "Queried: {} | Got: {} | Expect: {}",
            self.case.query.trim(),
            self.response,
            self.case.expected
        )?;
        if let Some(error) = &self.error {
            write!(f, " | Error: {}", error)?;
        }
        Ok(())
    }
}

/// Results of a whole plan.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TestReport {
    pub outcomes: Vec<CaseOutcome>,
}

impl TestReport {
    /// True only if every case passed.
    pub fn passed(&self) -> bool {
        self.outcomes.iter().all(|o| o.passed)
    }

    pub fn pass_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.passed).count()
    }
}

/// Runs CAT test cases over a channel.
pub struct CatTester<C: Channel> {
    channel: C,
}

impl<C: Channel> CatTester<C> {
    pub fn new(channel: C) -> Self {
        Self { channel }
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    /// Gives the channel back, e.g. to close it explicitly.
    pub fn into_inner(self) -> C {
        self.channel
    }

    /// Runs one exchange. I/O errors are recorded in the outcome, never
    /// propagated.
    pub fn run_case(&mut self, case: &TestCase) -> CaseOutcome {
        let (response, error) = match self.exchange(case) {
            Ok(raw) => (raw.trim().to_string(), None),
            Err(e) => (String::new(), Some(e.to_string())),
        };
        let passed = error.is_none() && response == case.expected;
        if passed {
            debug!("{} passed", case.query);
        } else {
            warn!("{} expected '{}', got '{}'", case.query, case.expected, response);
        }
        CaseOutcome {
            case: case.clone(),
            response,
            error,
            passed,
        }
    }

    fn exchange(&mut self, case: &TestCase) -> crate::Result<String> {
        if let Some(set) = &case.set {
            self.channel.write_all(set.as_bytes())?;
        }
        self.channel.write_all(case.query.as_bytes())?;
        self.channel.read_line()
    }

    /// Runs every case in order, calling `on_outcome` after each one.
    pub fn run<F>(&mut self, plan: &[TestCase], mut on_outcome: F) -> TestReport
    where
        F: FnMut(&CaseOutcome),
    {
        let mut report = TestReport::default();
        for case in plan {
            let outcome = self.run_case(case);
            on_outcome(&outcome);
            report.outcomes.push(outcome);
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::SimulatedChannel;
    use crate::error::Error;
    use crate::simulator::Simulator;
    use std::collections::{HashMap, VecDeque};

    /// Answers each query from a per-query queue, regardless of what was set.
    #[derive(Default)]
    struct ScriptedChannel {
        answers: HashMap<String, VecDeque<String>>,
        pending: VecDeque<String>,
        written: Vec<String>,
        fail_writes: bool,
    }

    impl ScriptedChannel {
        fn echoing(plan: &[TestCase]) -> Self {
            let mut channel = Self::default();
            for case in plan {
                channel.answer(&case.query, &case.expected);
            }
            channel
        }

        fn answer(&mut self, query: &str, response: &str) {
            self.answers
                .entry(query.to_string())
                .or_default()
                .push_back(response.to_string());
        }

        fn replace(&mut self, query: &str, response: &str) {
            self.answers.remove(query);
            self.answer(query, response);
        }
    }

    impl Channel for ScriptedChannel {
        fn write_all(&mut self, bytes: &[u8]) -> crate::Result<()> {
            if self.fail_writes {
                return Err(Error::NotConnected);
            }
            let frame = String::from_utf8_lossy(bytes).into_owned();
            if let Some(answer) = self.answers.get_mut(&frame).and_then(|q| q.pop_front()) {
                self.pending.push_back(answer);
            }
            self.written.push(frame);
            Ok(())
        }

        fn read_line(&mut self) -> crate::Result<String> {
            Ok(self.pending.pop_front().unwrap_or_default())
        }

        fn close(&mut self) {}
    }

    #[test]
    fn frequency_set_is_nine_digits() {
        assert_eq!(cmd_set_frequency(14_074_000), "FA014074000;");
        assert_eq!(cmd_set_frequency(7_000), "FA000007000;");
    }

    #[test]
    fn flag_and_query_frames() {
        assert_eq!(cmd_set_flag("TX", true), "TX1;");
        assert_eq!(cmd_set_flag("ST", false), "ST0;");
        assert_eq!(cmd_query("ID"), "ID;");
    }

    #[test]
    fn standard_plan_layout() {
        let plan = standard_plan(TEST_FREQUENCY_HZ);
        assert_eq!(plan.len(), 11);
        let mut groups: Vec<&str> = plan.iter().map(|c| c.group).collect();
        groups.dedup();
        assert_eq!(groups.len(), 9);
        assert_eq!(plan[0].set.as_deref(), Some("FA014074000;"));
        assert_eq!(plan[0].expected, "FA014074000;");
        let interface = plan.iter().find(|c| c.query == "IF;").unwrap();
        assert_eq!(interface.expected, "IF001014074000+000000C00000;");
    }

    #[test]
    fn exact_echo_passes_everything() {
        let plan = standard_plan(TEST_FREQUENCY_HZ);
        let mut tester = CatTester::new(ScriptedChannel::echoing(&plan));
        let report = tester.run(&plan, |_| {});
        assert!(report.passed());
        assert_eq!(report.pass_count(), plan.len());
    }

    #[test]
    fn set_is_written_before_query() {
        let plan = standard_plan(TEST_FREQUENCY_HZ);
        let mut tester = CatTester::new(ScriptedChannel::echoing(&plan));
        tester.run_case(&plan[1]);
        assert_eq!(tester.channel().written, vec!["TX1;", "TX;"]);
    }

    #[test]
    fn wrong_id_fails_the_run() {
        let plan = standard_plan(TEST_FREQUENCY_HZ);
        let mut channel = ScriptedChannel::echoing(&plan);
        channel.replace("ID;", "ID0651;");
        let mut tester = CatTester::new(channel);
        let report = tester.run(&plan, |_| {});
        assert!(!report.passed());
        assert_eq!(report.pass_count(), plan.len() - 1);
        let id = report.outcomes.iter().find(|o| o.case.query == "ID;").unwrap();
        assert!(!id.passed);
        assert_eq!(id.response, "ID0651;");
    }

    #[test]
    fn matching_id_passes() {
        let case = TestCase::query("Device ID Query", "ID;", "ID0650;");
        let mut tester = CatTester::new(ScriptedChannel::echoing(std::slice::from_ref(&case)));
        assert!(tester.run_case(&case).passed);
    }

    #[test]
    fn surrounding_whitespace_is_stripped() {
        let case = TestCase::query("Device ID Query", "ID;", "ID0650;");
        let mut channel = ScriptedChannel::default();
        channel.answer("ID;", "  ID0650;\r\n");
        let outcome = CatTester::new(channel).run_case(&case);
        assert!(outcome.passed);
        assert_eq!(outcome.response, "ID0650;");
    }

    #[test]
    fn inner_deviation_fails() {
        let case = TestCase::query("Device ID Query", "ID;", "ID0650;");
        let mut channel = ScriptedChannel::default();
        channel.answer("ID;", "ID 0650;");
        assert!(!CatTester::new(channel).run_case(&case).passed);
    }

    #[test]
    fn missing_response_is_a_recorded_failure() {
        let plan = standard_plan(TEST_FREQUENCY_HZ);
        let mut tester = CatTester::new(ScriptedChannel::default());
        let report = tester.run(&plan, |_| {});
        assert_eq!(report.outcomes.len(), plan.len());
        assert_eq!(report.pass_count(), 0);
    }

    #[test]
    fn io_error_is_recorded_and_run_continues() {
        let plan = standard_plan(TEST_FREQUENCY_HZ);
        let channel = ScriptedChannel {
            fail_writes: true,
            ..ScriptedChannel::default()
        };
        let mut seen = 0;
        let report = CatTester::new(channel).run(&plan, |_| seen += 1);
        assert_eq!(seen, plan.len());
        assert!(report.outcomes.iter().all(|o| o.error.is_some()));
        assert!(!report.passed());
    }

    #[test]
    fn outcome_line_format() {
        let plan = standard_plan(TEST_FREQUENCY_HZ);
        let mut tester = CatTester::new(ScriptedChannel::echoing(&plan));
        let set = tester.run_case(&plan[1]);
        assert_eq!(
            set.to_string(),
            "Sent: TX1; | Queried: TX; | Got: TX1; | Expect: TX1;"
        );
        let query = tester.run_case(&plan[5]);
        assert_eq!(
            query.to_string(),
            "Queried: ID; | Got: ID0650; | Expect: ID0650;"
        );
    }

    #[test]
    fn standard_plan_passes_against_firmware_simulator() {
        let plan = standard_plan(TEST_FREQUENCY_HZ);
        let mut tester = CatTester::new(SimulatedChannel::new(Simulator::new()));
        let report = tester.run(&plan, |_| {});
        let failed: Vec<String> = report
            .outcomes
            .iter()
            .filter(|o| !o.passed)
            .map(|o| o.to_string())
            .collect();
        assert!(failed.is_empty(), "failed cases: {:?}", failed);
        let sim = tester.into_inner();
        assert_eq!(sim.simulator().frequency_hz, TEST_FREQUENCY_HZ);
        assert!(!sim.simulator().split);
    }

    #[test]
    fn out_of_window_frequency_fails_against_simulator() {
        let plan = standard_plan(20_000_000);
        let mut tester = CatTester::new(SimulatedChannel::new(Simulator::new()));
        let report = tester.run(&plan, |_| {});
        assert!(!report.outcomes[0].passed);
        assert_eq!(report.outcomes[0].response, "FA010000000;");
        assert!(!report.passed());
    }
}
