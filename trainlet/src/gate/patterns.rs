//! Static pattern denylist gate.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;

use super::{Gate, GateError, Verdict};
use crate::notebook::Cell;

struct DenyRule {
    pattern: Regex,
    what: &'static str,
}

macro_rules! deny {
    ($pattern:literal, $what:literal) => {
        DenyRule {
            pattern: Regex::new($pattern).expect("denylist pattern must compile"),
            what: $what,
        }
    };
}

/// Signatures of code a trainer must never run against provider data:
/// process spawning, OS/network module access, raw-sample display, and data
/// export. Ordered; the first match wins.
static DENYLIST: LazyLock<Vec<DenyRule>> = LazyLock::new(|| {
    vec![
        deny!(r"os\.system", "shelling out via os.system"),
        deny!(r"subprocess\.(call|run|Popen)", "spawning subprocesses"),
        deny!(r"\bimport\s+os\b", "importing the os module"),
        deny!(r"\bimport\s+sys\b", "importing the sys module"),
        deny!(r"\bimport\s+subprocess\b", "importing the subprocess module"),
        deny!(r"\bimport\s+socket\b", "importing the socket module"),
        deny!(r"\bimport\s+webbrowser\b", "importing the webbrowser module"),
        deny!(r"\bimport\s+requests\b", "importing the requests library"),
        deny!(r"\bimport\s+urllib\b", "importing the urllib library"),
        deny!(r"socket\.", "using the socket module"),
        deny!(r"requests\.", "using the requests library"),
        deny!(r"urllib\.request", "using urllib.request"),
        deny!(r"webbrowser\.", "using the webbrowser module"),
        deny!(r"plt\.", "plotting raw samples via matplotlib"),
        deny!(r"\.head\(", "displaying raw sample rows"),
        deny!(r"\.to_csv\(", "exporting data frames to CSV"),
        deny!(r"json\.dump", "exporting data via json.dump"),
    ]
});

/// Scans the target cell's code against the denylist. Purely local; the
/// notebook context and folder names are ignored.
pub struct PatternGate;

impl PatternGate {
    pub fn new() -> Self {
        Self
    }
}

impl Default for PatternGate {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Gate for PatternGate {
    async fn evaluate(
        &self,
        _cells: &[Cell],
        target: &Cell,
        _dataset_folders: &[String],
    ) -> Result<Verdict, GateError> {
        for rule in DENYLIST.iter() {
            if rule.pattern.is_match(&target.code) {
                tracing::debug!(cell_id = %target.cell_id, what = rule.what, "Cell denied by pattern");
                return Ok(Verdict::Rejected(format!(
                    "code matches a disallowed pattern: {}",
                    rule.what
                )));
            }
        }
        Ok(Verdict::Approved)
    }
}
