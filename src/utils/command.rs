/// Functions and structs for building external tool command lines and probing tool versions

use anyhow::{anyhow, Result};
use log::{debug, info, warn};

use crate::config::defs::{PipelineError, RunConfig, CUTADAPT_TAG, TOOL_VERSIONS, VSEARCH_TAG};
use crate::utils::streams::spawn_and_wait;


/// Per-invocation settings that turn into a tool's argument vector.
pub trait ArgGenerator {
    fn generate_args(&self, config: &RunConfig) -> Result<Vec<String>>;
}


pub mod cutadapt {
    use std::path::PathBuf;
    use anyhow::{anyhow, Result};
    use crate::config::defs::RunConfig;
    use super::ArgGenerator;

    pub struct CutadaptConfig {
        pub forward_in: PathBuf,
        pub reverse_in: PathBuf,
        pub forward_out: PathBuf,
        pub reverse_out: PathBuf,
    }

    impl ArgGenerator for CutadaptConfig {
        fn generate_args(&self, config: &RunConfig) -> Result<Vec<String>> {
            let args = &config.args;
            let mut args_vec: Vec<String> = Vec::new();
            args_vec.push("-q".to_string());
            args_vec.push(args.quality.to_string());
            args_vec.push("-m".to_string());
            args_vec.push(args.min_length.to_string());

            if let Some(adapter) = &args.adapter_fwd {
                validate_adapter(adapter)?;
                args_vec.push("-a".to_string());
                args_vec.push(adapter.clone());
            }
            if let Some(adapter) = &args.adapter_rev {
                validate_adapter(adapter)?;
                args_vec.push("-A".to_string());
                args_vec.push(adapter.clone());
            }

            args_vec.push("-j".to_string());
            args_vec.push(config.threads.to_string());
            args_vec.push("-o".to_string());
            args_vec.push(self.forward_out.to_string_lossy().to_string());
            args_vec.push("-p".to_string());
            args_vec.push(self.reverse_out.to_string_lossy().to_string());
            args_vec.push(self.forward_in.to_string_lossy().to_string());
            args_vec.push(self.reverse_in.to_string_lossy().to_string());
            Ok(args_vec)
        }
    }

    /// cutadapt accepts IUPAC adapters plus its anchoring (^ $) and X markers.
    fn validate_adapter(adapter: &str) -> Result<()> {
        let ok = !adapter.is_empty()
            && adapter.bytes().all(|b| b"ACGTURYSWKMBDHVNXacgturyswkmbdhvnx^$".contains(&b));
        if ok {
            Ok(())
        } else {
            Err(anyhow!("Invalid adapter sequence: '{}'", adapter))
        }
    }

    /// `cutadapt --version` prints the bare version, e.g. `4.4`.
    pub fn parse_version(stdout: &[String], _stderr: &[String]) -> Option<String> {
        stdout.iter().map(|line| line.trim()).find(|line| !line.is_empty()).map(str::to_string)
    }
}


pub mod vsearch {
    use std::path::PathBuf;
    use anyhow::{anyhow, Result};
    use crate::config::defs::{RunConfig, VsearchSubcommand};
    use super::ArgGenerator;

    pub struct VsearchConfig {
        pub subcommand: VsearchSubcommand,
        pub input: PathBuf,
        pub subcommand_fields: Vec<(String, Option<String>)>,
    }

    impl VsearchConfig {
        /// Dereplication with abundance annotation of the uniques.
        pub fn dereplicate(input: PathBuf, fasta_out: PathBuf) -> Self {
            VsearchConfig {
                subcommand: VsearchSubcommand::FastxUniques,
                input,
                subcommand_fields: vec![
                    ("--sizeout".to_string(), None),
                    ("--fastaout".to_string(), Some(fasta_out.to_string_lossy().to_string())),
                ],
            }
        }

        /// Abundance-sorted greedy clustering; sizes in and out so centroid labels
        /// carry the summed abundance of their cluster.
        pub fn cluster(input: PathBuf, identity: f64, centroids: PathBuf, uc: PathBuf) -> Self {
            VsearchConfig {
                subcommand: VsearchSubcommand::ClusterSize,
                input,
                subcommand_fields: vec![
                    ("--id".to_string(), Some(identity.to_string())),
                    ("--sizein".to_string(), None),
                    ("--sizeout".to_string(), None),
                    ("--centroids".to_string(), Some(centroids.to_string_lossy().to_string())),
                    ("--uc".to_string(), Some(uc.to_string_lossy().to_string())),
                ],
            }
        }
    }

    impl ArgGenerator for VsearchConfig {
        fn generate_args(&self, config: &RunConfig) -> Result<Vec<String>> {
            let mut args_vec: Vec<String> = Vec::new();
            args_vec.push(self.subcommand.as_flag().to_string());
            args_vec.push(self.input.to_string_lossy().to_string());

            for (flag, value) in &self.subcommand_fields {
                if flag == "--id" {
                    let identity: f64 = value
                        .as_deref()
                        .ok_or_else(|| anyhow!("--id requires a value"))?
                        .parse()?;
                    if !(identity > 0.0 && identity <= 1.0) {
                        return Err(anyhow!("Identity threshold must be in (0, 1], got {}", identity));
                    }
                }
                args_vec.push(flag.clone());
                if let Some(value) = value {
                    args_vec.push(value.clone());
                }
            }

            // vsearch drops sequences under 32 nt unless told otherwise
            args_vec.push("--minseqlength".to_string());
            args_vec.push("1".to_string());

            if self.subcommand == VsearchSubcommand::ClusterSize {
                args_vec.push("--threads".to_string());
                args_vec.push(config.threads.to_string());
            }
            Ok(args_vec)
        }
    }

    /// `vsearch --version` writes e.g. `vsearch v2.22.1_linux_x86_64, 15.5GB RAM, 8 cores` to stderr.
    pub fn parse_version(stdout: &[String], stderr: &[String]) -> Option<String> {
        stderr
            .iter()
            .chain(stdout.iter())
            .flat_map(|line| line.split_whitespace())
            .find_map(|token| {
                let rest = token.strip_prefix('v')?;
                if !rest.starts_with(|c: char| c.is_ascii_digit()) {
                    return None;
                }
                let version = rest.split(|c: char| c == '_' || c == ',').next()?;
                Some(version.to_string())
            })
    }
}


/// Executable configured for a tool tag.
pub fn tool_program<'a>(tool: &str, config: &'a RunConfig) -> Result<&'a str> {
    match tool {
        CUTADAPT_TAG => Ok(&config.args.cutadapt_bin),
        VSEARCH_TAG => Ok(&config.args.vsearch_bin),
        _ => Err(anyhow!("Unknown tool: {}", tool)),
    }
}


pub fn generate_cli(tool: &str, config: &RunConfig, tool_config: &dyn ArgGenerator) -> Result<Vec<String>> {
    let args = tool_config.generate_args(config)?;
    debug!("{} args: {:?}", tool, args);
    Ok(args)
}


/// Parses the leading `major.minor` of a version string.
pub fn major_minor(version: &str) -> Option<(u32, u32)> {
    let mut parts = version.trim().split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts
        .next()
        .map(|m| m.chars().take_while(|c| c.is_ascii_digit()).collect::<String>())
        .and_then(|m| m.parse().ok())
        .unwrap_or(0);
    Some((major, minor))
}


pub async fn check_version(tool: &str, config: &RunConfig) -> Result<String, PipelineError> {
    let program = tool_program(tool, config)?;
    let output = spawn_and_wait(tool, program, &["--version".to_string()]).await?;

    let version = match tool {
        CUTADAPT_TAG => cutadapt::parse_version(&output.stdout, &output.stderr),
        VSEARCH_TAG => vsearch::parse_version(&output.stdout, &output.stderr),
        _ => None,
    }
        .ok_or_else(|| PipelineError::ExternalTool {
            tool: tool.to_string(),
            error: "Could not determine version from --version output".to_string(),
        })?;

    match (major_minor(&version), TOOL_VERSIONS.get(tool)) {
        (Some(found), Some(&minimum)) if found < minimum => {
            warn!("{} {} is older than the tested minimum {}.{}", tool, version, minimum.0, minimum.1);
        }
        (None, _) => warn!("Unrecognised {} version string: {}", tool, version),
        _ => {}
    }
    Ok(version)
}


/// Confirms every tool can be spawned and logs its version.
pub async fn check_versions(tools: Vec<&str>, config: &RunConfig) -> Result<(), PipelineError> {
    for tool in tools {
        let version = check_version(tool, config).await?;
        info!("Found {} version {}", tool, version);
    }
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use clap::Parser;
    use crate::cli::Arguments;
    use crate::utils::command::cutadapt::CutadaptConfig;
    use crate::utils::command::vsearch::VsearchConfig;

    fn config(extra: &[&str]) -> RunConfig {
        let mut argv = vec!["jalnetra-pipelines", "-m", "edna_classify"];
        argv.extend_from_slice(extra);
        let args = Arguments::parse_from(argv);
        RunConfig::new(args, PathBuf::from("/work"), PathBuf::from("/work/out"), "s".to_string(), 2, 0).unwrap()
    }

    #[test]
    fn test_cutadapt_args() -> Result<()> {
        let config = config(&["-a", "AGATCGGAAGAGC", "-A", "AGATCGGAAGAGC"]);
        let cutadapt_config = CutadaptConfig {
            forward_in: PathBuf::from("in_R1.fq"),
            reverse_in: PathBuf::from("in_R2.fq"),
            forward_out: PathBuf::from("t1.fq"),
            reverse_out: PathBuf::from("t2.fq"),
        };
        let args = generate_cli(CUTADAPT_TAG, &config, &cutadapt_config)?;
        assert_eq!(&args[..4], ["-q", "20", "-m", "150"]);
        assert!(args.windows(2).any(|w| w == ["-a", "AGATCGGAAGAGC"]));
        assert!(args.windows(2).any(|w| w == ["-A", "AGATCGGAAGAGC"]));
        assert!(args.windows(2).any(|w| w == ["-o", "t1.fq"]));
        assert_eq!(&args[args.len() - 2..], ["in_R1.fq", "in_R2.fq"]);
        Ok(())
    }

    #[test]
    fn test_cutadapt_rejects_bad_adapter() {
        let config = config(&["-a", "ACGT;rm"]);
        let cutadapt_config = CutadaptConfig {
            forward_in: PathBuf::from("a"),
            reverse_in: PathBuf::from("b"),
            forward_out: PathBuf::from("c"),
            reverse_out: PathBuf::from("d"),
        };
        assert!(generate_cli(CUTADAPT_TAG, &config, &cutadapt_config).is_err());
    }

    #[test]
    fn test_vsearch_cluster_args() -> Result<()> {
        let config = config(&[]);
        let vsearch_config = VsearchConfig::cluster(PathBuf::from("u.fasta"), 0.97, PathBuf::from("otus.fasta"), PathBuf::from("c.uc"));
        let args = generate_cli(VSEARCH_TAG, &config, &vsearch_config)?;
        assert_eq!(args[0], "--cluster_size");
        assert_eq!(args[1], "u.fasta");
        assert!(args.windows(2).any(|w| w == ["--id", "0.97"]));
        assert!(args.contains(&"--sizein".to_string()));
        assert!(args.windows(2).any(|w| w == ["--threads", "2"]));

        let bad = VsearchConfig::cluster(PathBuf::from("u.fasta"), 1.5, PathBuf::from("o"), PathBuf::from("c"));
        assert!(generate_cli(VSEARCH_TAG, &config, &bad).is_err());
        Ok(())
    }

    #[test]
    fn test_vsearch_derep_args() -> Result<()> {
        let config = config(&[]);
        let vsearch_config = VsearchConfig::dereplicate(PathBuf::from("all.fq"), PathBuf::from("u.fasta"));
        let args = generate_cli(VSEARCH_TAG, &config, &vsearch_config)?;
        assert_eq!(args, ["--fastx_uniques", "all.fq", "--sizeout", "--fastaout", "u.fasta", "--minseqlength", "1"]);
        Ok(())
    }

    #[test]
    fn test_parse_versions() {
        let stderr = vec!["vsearch v2.22.1_linux_x86_64, 15.5GB RAM, 8 cores".to_string()];
        assert_eq!(vsearch::parse_version(&[], &stderr).as_deref(), Some("2.22.1"));
        assert_eq!(cutadapt::parse_version(&["4.4".to_string()], &[]).as_deref(), Some("4.4"));
        assert_eq!(major_minor("2.22.1"), Some((2, 22)));
        assert_eq!(major_minor("4"), Some((4, 0)));
        assert!(major_minor("dev") .is_none());
        assert!((2, 9) < (2, 15));
    }
}
