use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockCounters {
    pub executions: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_operations: Option<u64>,
}

/// Per basic block counters of one profiled kernel.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub kernel: String,
    pub thread_blocks: u64,
    pub threads: u64,
    /// Counters keyed by basic block label in analysis order.
    pub counters: IndexMap<String, BlockCounters>,
}

impl Report {
    /// Writes the report as pretty JSON followed by a newline.
    pub fn write_json(&self, mut writer: impl std::io::Write) -> Result<(), super::Error> {
        crate::database::write_json(&mut writer, self).map_err(super::Error::Report)?;
        writeln!(writer)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{BlockCounters, Report};
    use color_eyre::eyre;
    use similar_asserts as diff;

    #[test]
    fn test_report_json() -> eyre::Result<()> {
        let report = Report {
            kernel: "vecAdd".to_string(),
            thread_blocks: 2,
            threads: 4,
            counters: [
                (
                    "BB_0".to_string(),
                    BlockCounters {
                        executions: 8,
                        memory_operations: Some(16),
                    },
                ),
                (
                    "BB_1".to_string(),
                    BlockCounters {
                        executions: 0,
                        memory_operations: None,
                    },
                ),
            ]
            .into_iter()
            .collect(),
        };
        let mut out = Vec::new();
        report.write_json(&mut out)?;
        diff::assert_eq!(
            have: String::from_utf8(out)?,
            want: indoc::indoc! {r#"
                {
                    "kernel": "vecAdd",
                    "threadBlocks": 2,
                    "threads": 4,
                    "counters": {
                        "BB_0": {
                            "executions": 8,
                            "memoryOperations": 16
                        },
                        "BB_1": {
                            "executions": 0
                        }
                    }
                }
            "#}
        );
        Ok(())
    }
}
