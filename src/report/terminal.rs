use std::collections::HashMap;
use std::path::Path;

use anyhow::Result;
use colored::*;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Attribute, Cell, CellAlignment, Color, ContentArrangement, Table};

use crate::models::{Package, ProblemRecord, SourceKind};
use crate::problems::ProblemPackages;
use crate::scan::ScanResults;

/// Render a colored terminal report.
pub fn render(
    results: &ScanResults,
    problems: &ProblemPackages,
    path: &Path,
    include_transitive: bool,
    verbose: bool,
    quiet: bool,
) -> Result<()> {
    let packages = results.packages();
    let total = packages.len();
    let problem_count = problems.records().len();
    let transitive_count = problems.pip.transitive.len()
        + [&problems.docker, &problems.bash, &problems.notebook]
            .iter()
            .map(|c| c.pip.transitive.len())
            .sum::<usize>();
    let direct_count = problem_count - transitive_count;
    let pass_count = packages
        .iter()
        .filter(|(_, _, p)| !p.has_problems(include_transitive))
        .count();

    if quiet {
        println!(
            "Total: {}  Pass: {}  Direct problems: {}  Transitive problems: {}",
            total,
            pass_count.to_string().green(),
            direct_count.to_string().red(),
            transitive_count.to_string().yellow(),
        );
        return Ok(());
    }

    println!(
        "\n {} v{}",
        "license-auditr".bold(),
        env!("CARGO_PKG_VERSION")
    );
    println!(" Repository: {}\n", path.display());

    println!(" ┌────────────────────────────────────────────────────┐");
    println!(" │  {:<48} │", "SUMMARY".bold());
    println!(" │  {:<48} │", format!("Packages resolved  : {}", total));
    println!(
        " │  {:<48} │",
        format!("{}  Pass               : {:>4}", "✓".green(), pass_count)
    );
    println!(
        " │  {:<48} │",
        format!(
            "{}  Direct problems    : {:>4}  {}",
            "✗".red(),
            direct_count,
            summarize_licenses(problems.records().into_iter().filter(|r| r.package.is_direct), include_transitive)
        )
    );
    println!(
        " │  {:<48} │",
        format!(
            "{}  Transitive problems: {:>4}  {}",
            "⚠".yellow(),
            transitive_count,
            summarize_licenses(problems.records().into_iter().filter(|r| !r.package.is_direct), include_transitive)
        )
    );
    println!(" └────────────────────────────────────────────────────┘\n");

    if problems.is_empty() {
        println!(" {} No packages need attention.\n", "[PASS]".green().bold());
    } else {
        println!(" {} Packages for attention:\n", "[ERROR]".red().bold());
        for kind in SourceKind::ALL {
            let records: Vec<&ProblemRecord> = problems
                .records()
                .into_iter()
                .filter(|r| r.source_kind == kind)
                .collect();
            if records.is_empty() {
                continue;
            }
            println!(" {}", format!("[{}]", kind).bold());
            render_problem_table(&records, include_transitive);
            println!();
        }
    }

    if verbose && total > 0 {
        println!(" {} All resolved packages:\n", "[INFO]".cyan().bold());
        render_package_table(&packages, include_transitive);
        println!();
    }

    Ok(())
}

fn render_problem_table(records: &[&ProblemRecord], include_transitive: bool) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Package").add_attribute(Attribute::Bold),
            Cell::new("File").add_attribute(Attribute::Bold),
            Cell::new("Dependency").add_attribute(Attribute::Bold),
            Cell::new("License").add_attribute(Attribute::Bold),
            Cell::new("Note").add_attribute(Attribute::Bold),
        ]);

    for record in records {
        let package = &record.package;
        let licenses: Vec<String> = package
            .problem_licenses(include_transitive)
            .iter()
            .map(|l| l.reason())
            .collect();
        let (dependency, color) = if package.is_direct {
            ("direct", Color::Red)
        } else {
            ("transitive", Color::Yellow)
        };

        table.add_row(vec![
            Cell::new(package.name_version()),
            Cell::new(record.source_file.display().to_string()),
            Cell::new(dependency)
                .fg(color)
                .set_alignment(CellAlignment::Center),
            Cell::new(licenses.join("\n")),
            Cell::new(package.note()),
        ]);
    }

    println!("{}", table);
}

fn render_package_table(packages: &[(SourceKind, &Path, &Package)], include_transitive: bool) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Source").add_attribute(Attribute::Bold),
            Cell::new("File").add_attribute(Attribute::Bold),
            Cell::new("Package").add_attribute(Attribute::Bold),
            Cell::new("License").add_attribute(Attribute::Bold),
            Cell::new("Verdict").add_attribute(Attribute::Bold),
        ]);

    for (kind, file, package) in packages {
        let licenses: Vec<String> = package
            .all_licenses(include_transitive)
            .iter()
            .map(|l| l.reason())
            .collect();
        let (verdict, color) = if package.has_problems(include_transitive) {
            ("✗ problem", Color::Red)
        } else {
            ("✓ pass", Color::Green)
        };

        table.add_row(vec![
            Cell::new(kind.to_string()),
            Cell::new(file.display().to_string()),
            Cell::new(package.name_version()),
            Cell::new(licenses.join("\n")),
            Cell::new(verdict)
                .fg(color)
                .set_alignment(CellAlignment::Center),
        ]);
    }

    println!("{}", table);
}

/// The three most common failing licenses, e.g. `[GPL (3), UNKNOWN (1)]`.
fn summarize_licenses<'a, I>(records: I, include_transitive: bool) -> String
where
    I: Iterator<Item = &'a ProblemRecord>,
{
    let mut counts: HashMap<String, usize> = HashMap::new();
    for record in records {
        for license in record.package.problem_licenses(include_transitive) {
            *counts.entry(license.name.clone()).or_insert(0) += 1;
        }
    }

    let mut pairs: Vec<(String, usize)> = counts.into_iter().collect();
    pairs.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    let summary: Vec<String> = pairs
        .iter()
        .take(3)
        .map(|(lic, cnt)| format!("{} ({})", lic, cnt))
        .collect();

    if summary.is_empty() {
        String::new()
    } else {
        format!("[{}]", summary.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::license::policy::{PackageLists, Policy};
    use std::path::PathBuf;

    fn record(name: &str, license: &str, direct: bool) -> ProblemRecord {
        let policy = Policy::new(&["MIT".to_string()], PackageLists::default(), PackageLists::default())
            .unwrap();
        ProblemRecord {
            source_kind: SourceKind::Pip,
            source_file: PathBuf::from("requirements.txt"),
            package: Package::python(name, "1.0", license, None, direct, &policy),
        }
    }

    #[test]
    fn test_summarize_licenses() {
        let records = vec![
            record("a", "GPL", true),
            record("b", "GPL; LGPL", true),
            record("c", "AGPL", true),
            record("d", "Proprietary", true),
        ];
        assert_eq!(
            summarize_licenses(records.iter(), true),
            "[GPL (2), AGPL (1), LGPL (1)]"
        );
        assert_eq!(summarize_licenses(std::iter::empty(), true), "");
    }

    #[test]
    fn test_render_does_not_fail() {
        let mut problems = ProblemPackages::default();
        problems.pip.direct.push(record("a", "GPL", true));
        problems.pip.transitive.push(record("b", "GPL", false));
        let results = ScanResults::default();
        render(&results, &problems, Path::new("."), true, true, false).unwrap();
        render(&results, &problems, Path::new("."), true, false, true).unwrap();
    }
}
