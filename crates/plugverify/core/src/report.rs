// Plugverify
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! Plain text rendering of verification results
//!
//! Problems are grouped under their short description. Suppressing missing
//! optional dependencies only changes what is printed, never the verdict.

use indexmap::{IndexMap, IndexSet};
use std::fmt;
use std::io::{self, Write};

use crate::dependencies::MissingDependency;
use crate::dynamic::DynamicPluginStatus;
use crate::plugin::{PluginDependency, PluginInfo};
use crate::problems::{Problem, Warning};
use crate::verdict::{VerificationResult, Verdict};

type DependencyPredicate = Box<dyn Fn(&PluginDependency) -> bool + Send + Sync>;

/// Rendering switches
#[derive(Default)]
pub struct PrinterOptions {
    ignore_missing_optional: Option<DependencyPredicate>,
    pub show_dynamic_status: bool,
}

impl PrinterOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hides missing optional dependencies accepted by `predicate`
    pub fn ignore_missing_optional<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&PluginDependency) -> bool + Send + Sync + 'static,
    {
        self.ignore_missing_optional = Some(Box::new(predicate));
        self
    }

    pub fn with_dynamic_status(mut self) -> Self {
        self.show_dynamic_status = true;
        self
    }

    pub fn is_ignored(&self, dependency: &PluginDependency) -> bool {
        self.ignore_missing_optional.as_ref().is_some_and(|predicate| predicate(dependency))
    }
}

impl fmt::Debug for PrinterOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrinterOptions")
            .field("ignore_missing_optional", &self.ignore_missing_optional.is_some())
            .field("show_dynamic_status", &self.show_dynamic_status)
            .finish()
    }
}

/// Writes results to any [`Write`] sink
pub struct WriterPrinter<W: Write> {
    out: W,
}

impl<W: Write> WriterPrinter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    pub fn print_results(&mut self, results: &[VerificationResult], options: &PrinterOptions) -> io::Result<()> {
        for result in results {
            self.print_result(result, options)?;
        }
        self.out.flush()
    }

    pub fn print_result(&mut self, result: &VerificationResult, options: &PrinterOptions) -> io::Result<()> {
        let plugin = &result.plugin;
        let target = &result.target;
        match &result.verdict {
            Verdict::Ok => writeln!(self.out, "With {target} the plugin {plugin} is OK")?,
            Verdict::Warnings { warnings } => {
                if !self.print_warnings(&target.to_string(), plugin, warnings, options)? {
                    writeln!(self.out, "With {target} the plugin {plugin} is OK")?;
                }
            }
            Verdict::Problems { problems, warnings } => {
                self.print_problems(&target.to_string(), plugin, problems)?;
                self.print_warnings(&target.to_string(), plugin, warnings, options)?;
            }
            Verdict::MissingDependencies { missing, problems, warnings } => {
                self.print_missing_dependencies(missing, options)?;
                self.print_warnings(&target.to_string(), plugin, warnings, options)?;
                self.print_problems(&target.to_string(), plugin, problems)?;
            }
            Verdict::Bad { errors } => {
                let errors: Vec<String> = errors.iter().map(ToString::to_string).collect();
                writeln!(self.out, "The plugin {plugin} is broken: {}", errors.join(", "))?;
            }
            Verdict::NotFound { reason } => writeln!(self.out, "The plugin {plugin} is not found: {reason}")?,
            Verdict::FailedToDownload { reason } => writeln!(self.out, "The plugin {plugin} is not downloaded from the repository: {reason}")?,
        }

        if options.show_dynamic_status
            && let Some(status) = &result.dynamic_status
        {
            match status {
                DynamicPluginStatus::MaybeDynamic => writeln!(self.out, "    Plugin can probably be enabled or disabled without restart")?,
                DynamicPluginStatus::NotDynamic(reasons) => {
                    writeln!(self.out, "    Plugin cannot be loaded or unloaded without restart:")?;
                    for reason in reasons {
                        writeln!(self.out, "        {reason}")?;
                    }
                }
            }
        }
        Ok(())
    }

    fn print_missing_dependencies(&mut self, missing: &[MissingDependency], options: &PrinterOptions) -> io::Result<()> {
        let mandatory: Vec<&MissingDependency> = missing.iter().filter(|m| !m.is_optional()).collect();
        if !mandatory.is_empty() {
            writeln!(self.out, "    Some problems might have been caused by missing non-optional dependencies:")?;
            for dependency in mandatory {
                writeln!(self.out, "        {dependency}")?;
            }
        }

        let optional: Vec<&MissingDependency> = missing.iter().filter(|m| m.is_optional() && !options.is_ignored(&m.dependency)).collect();
        if !optional.is_empty() {
            writeln!(self.out, "    Missing optional dependencies:")?;
            for dependency in optional {
                writeln!(self.out, "        {}: {}", dependency.dependency, dependency.reason)?;
            }
        }
        Ok(())
    }

    /// Prints the warnings not hidden by `options`; returns whether any were printed
    fn print_warnings(&mut self, target: &str, plugin: &PluginInfo, warnings: &IndexSet<Warning>, options: &PrinterOptions) -> io::Result<bool> {
        let visible: Vec<&Warning> = warnings.iter().filter(|warning| !is_hidden(warning, options)).collect();
        if visible.is_empty() {
            return Ok(false);
        }
        writeln!(self.out, "With {target} the plugin {plugin} has {} {}", visible.len(), pluralize("warning", visible.len()))?;
        for warning in visible {
            writeln!(self.out, "    #{}", warning.message())?;
        }
        Ok(true)
    }

    fn print_problems(&mut self, target: &str, plugin: &PluginInfo, problems: &IndexSet<Problem>) -> io::Result<()> {
        writeln!(self.out, "With {target} the plugin {plugin} has {} {}", problems.len(), pluralize("problem", problems.len()))?;

        let mut grouped: IndexMap<String, Vec<String>> = IndexMap::new();
        for problem in problems {
            grouped.entry(problem.short_description()).or_default().push(problem.full_description());
        }
        for (short, descriptions) in grouped {
            writeln!(self.out, "    #{short}")?;
            for description in descriptions {
                writeln!(self.out, "        {description}")?;
            }
        }
        Ok(())
    }
}

fn is_hidden(warning: &Warning, options: &PrinterOptions) -> bool {
    match warning {
        Warning::OptionalDependencyNotResolved { dependency, .. } => options.is_ignored(&PluginDependency::optional(dependency.clone())),
        Warning::DeprecatedApiUsage { .. } | Warning::PluginStructure { .. } => false,
    }
}

fn pluralize(word: &str, count: usize) -> String {
    if count == 1 { word.to_string() } else { format!("{word}s") }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classes::{AccessFlags, ClassDefinition, ClassIndex};
    use crate::dependencies::NoDependencies;
    use crate::engine::{VerificationEngine, VerificationInput, VerificationTarget};
    use crate::plugin::PluginDetails;
    use crate::walker::JAVA_LANG_OBJECT;
    use crate::plugin::PluginStructureError;
    use crate::problems::Location;
    use crate::verdict::VerdictKind;

    fn render(verdict: Verdict, options: &PrinterOptions) -> String {
        render_result(VerificationResult::new(PluginInfo::new("com.example", "1.0"), VerificationTarget::new("241.1", "17"), verdict), options)
    }

    fn render_result(result: VerificationResult, options: &PrinterOptions) -> String {
        let mut printer = WriterPrinter::new(Vec::new());
        printer.print_results(&[result], options).unwrap();
        String::from_utf8(printer.into_inner()).unwrap()
    }

    fn sample(kind: VerdictKind) -> Verdict {
        let missing = |id: &str, optional| MissingDependency {
            plugin_id: "com.example".into(),
            dependency: PluginDependency { id: id.into(), optional },
            reason: "not in repository".into(),
        };
        let problems = IndexSet::from([
            Problem::ClassNotFound {
                class_name: "h/Gone".into(),
                location: Location::class("p/A"),
            },
            Problem::ClassNotFound {
                class_name: "h/Gone".into(),
                location: Location::class("p/B"),
            },
        ]);
        match kind {
            VerdictKind::Ok => Verdict::Ok,
            VerdictKind::Warnings => Verdict::Warnings {
                warnings: IndexSet::from([Warning::PluginStructure { message: "odd".into() }]),
            },
            VerdictKind::Problems => Verdict::Problems {
                problems,
                warnings: IndexSet::new(),
            },
            VerdictKind::MissingDependencies => Verdict::MissingDependencies {
                missing: vec![missing("com.lib", false), missing("com.lang", true), missing("com.ignored", true)],
                problems: IndexSet::new(),
                warnings: IndexSet::new(),
            },
            VerdictKind::Bad => Verdict::Bad {
                errors: vec![PluginStructureError::MissingVersion],
            },
            VerdictKind::NotFound => Verdict::NotFound { reason: "no such plugin".into() },
            VerdictKind::FailedToDownload => Verdict::FailedToDownload { reason: "timeout".into() },
        }
    }

    #[test]
    fn test_every_verdict_kind_renders() {
        for kind in VerdictKind::ALL {
            let text = render(sample(kind), &PrinterOptions::new());
            assert!(text.contains("com.example:1.0"), "{kind:?} rendered {text}");
        }
    }

    #[test]
    fn test_problems_grouped_by_short_description() {
        let text = render(sample(VerdictKind::Problems), &PrinterOptions::new());
        assert_eq!(text.matches("#Access to unresolved class h.Gone").count(), 1);
        assert!(text.contains("has 2 problems"));
        assert!(text.contains("class p.A references an unresolved class h.Gone"));
        assert!(text.contains("class p.B references an unresolved class h.Gone"));
    }

    #[test]
    fn test_ignored_optional_dependencies_are_hidden() {
        let options = PrinterOptions::new().ignore_missing_optional(|dependency| dependency.id == "com.ignored");
        let text = render(sample(VerdictKind::MissingDependencies), &options);
        assert!(text.contains("com.lib (required by com.example)"));
        assert!(text.contains("com.lang (optional): not in repository"));
        assert!(!text.contains("com.ignored"));
    }

    #[test]
    fn test_ignored_optional_dependency_warnings_are_hidden() {
        let plugin = PluginDetails::from_classes(
            PluginInfo::new("com.example", "1.0"),
            [ClassDefinition::new("p/A", AccessFlags::new(AccessFlags::PUBLIC)).with_super(JAVA_LANG_OBJECT)],
        )
        .with_dependency(PluginDependency::optional("com.ignored"))
        .with_dependency(PluginDependency::optional("com.shown"));
        let (host, jdk) = (
            ClassIndex::new("host"),
            ClassIndex::from_definitions("jdk", [ClassDefinition::new(JAVA_LANG_OBJECT, AccessFlags::new(AccessFlags::PUBLIC))]),
        );
        let result = VerificationEngine::new()
            .verify(&VerificationInput {
                plugin: &plugin,
                target: VerificationTarget::new("241.1", "17"),
                host: &host,
                jdk: &jdk,
                dependency_finder: &NoDependencies,
            })
            .unwrap();
        assert_eq!(result.verdict.kind(), VerdictKind::Warnings);

        let shown = render_result(result.clone(), &PrinterOptions::new().ignore_missing_optional(|dependency| dependency.id == "com.ignored"));
        assert!(!shown.contains("com.ignored"));
        assert!(shown.contains("has 1 warning"));
        assert!(shown.contains("com.shown"));

        let quiet = render_result(result, &PrinterOptions::new().ignore_missing_optional(|dependency| dependency.optional));
        assert!(quiet.contains("is OK"));
        assert!(!quiet.contains("warning"));
    }
}
