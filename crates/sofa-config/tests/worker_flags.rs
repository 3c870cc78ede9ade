//! Behaviour tests for worker flag parsing.

use std::cell::RefCell;
use std::ffi::OsString;

use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then};

use sofa_config::{Config, DEFAULT_LOG_FILTER, DEFAULT_LOG_FORMAT, ProtocolVersion};

struct Harness {
    cli_args: RefCell<Vec<OsString>>,
    loaded: RefCell<Option<Result<Config, String>>>,
}

impl Harness {
    fn new() -> Self {
        Self {
            cli_args: RefCell::new(vec![OsString::from("sofa-query-server")]),
            loaded: RefCell::new(None),
        }
    }

    fn push_cli_arg(&self, arg: impl Into<OsString>) {
        self.cli_args.borrow_mut().push(arg.into());
    }

    fn load(&self) -> Result<Config, String> {
        if let Some(result) = self.loaded.borrow().as_ref() {
            return result.clone();
        }
        let args = self.cli_args.borrow().clone();
        let result = Config::load_from_iter(args).map_err(|error| error.to_string());
        *self.loaded.borrow_mut() = Some(result.clone());
        result
    }

    fn config(&self) -> Config {
        match self.load() {
            Ok(config) => config,
            Err(error) => panic!("configuration failed to load: {error}"),
        }
    }
}

#[fixture]
fn harness() -> Harness {
    Harness::new()
}

#[given("the worker is launched without flags")]
fn given_no_flags(harness: &Harness) {
    assert_eq!(harness.cli_args.borrow().len(), 1);
}

#[given("the worker is launched with flag {flag} set to {value}")]
fn given_flag_with_value(harness: &Harness, flag: String, value: String) {
    harness.push_cli_arg(flag.trim_matches('"'));
    harness.push_cli_arg(value.trim_matches('"'));
}

#[given("the worker is launched with switch {flag}")]
fn given_flag(harness: &Harness, flag: String) {
    harness.push_cli_arg(flag.trim_matches('"'));
}

#[then("loading the configuration applies the built-in defaults")]
fn then_defaults_applied(harness: &Harness) {
    let config = harness.config();
    assert_eq!(config.log_filter(), DEFAULT_LOG_FILTER);
    assert_eq!(config.log_format(), DEFAULT_LOG_FORMAT);
    assert_eq!(config.protocol_version(), ProtocolVersion::LATEST);
    assert!(config.log_destination().is_none());
    assert!(!config.allow_get_update);
    assert!(!config.enable_bundles);
}

#[then("the negotiated protocol version is {version}")]
fn then_protocol_version(harness: &Harness, version: String) {
    let expected: ProtocolVersion = match version.trim_matches('"').parse() {
        Ok(parsed) => parsed,
        Err(error) => panic!("invalid expected version '{version}': {error}"),
    };
    assert_eq!(harness.config().protocol_version(), expected);
}

#[then("the effective log filter is {filter}")]
fn then_log_filter(harness: &Harness, filter: String) {
    assert_eq!(harness.config().log_filter(), filter.trim_matches('"'));
}

#[then("loading the configuration fails mentioning {fragment}")]
fn then_loading_fails(harness: &Harness, fragment: String) {
    let expected = fragment.trim_matches('"');
    match harness.load() {
        Ok(config) => panic!("expected failure, loaded {config:?}"),
        Err(message) => assert!(
            message.contains(expected),
            "expected '{expected}' in '{message}'"
        ),
    }
}

#[scenario(
    path = "tests/features/worker_flags.feature",
    name = "Host launches the worker without flags"
)]
fn launches_without_flags(#[from(harness)] harness: Harness) {
    let _ = harness;
}

#[scenario(
    path = "tests/features/worker_flags.feature",
    name = "Host pins a legacy protocol revision"
)]
fn pins_legacy_revision(#[from(harness)] harness: Harness) {
    let _ = harness;
}

#[scenario(
    path = "tests/features/worker_flags.feature",
    name = "Debug logging wins over an explicit level"
)]
fn debug_wins(#[from(harness)] harness: Harness) {
    let _ = harness;
}

#[scenario(
    path = "tests/features/worker_flags.feature",
    name = "Malformed protocol revision is rejected"
)]
fn rejects_malformed_revision(#[from(harness)] harness: Harness) {
    let _ = harness;
}
