use anyhow::Result;
use regex::Regex;

use super::commands::{extract_commands, split_chains};
use super::install::CopyInstruction;
use super::{Recipe, RecipeAnalyzer, RecipeKind};

/// One build instruction with continuations joined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub keyword: String,
    pub value: String,
    /// Body lines of a `<<MARKER` here-document following the instruction.
    pub heredoc: Vec<String>,
}

pub struct DockerfileAnalyzer;

impl RecipeAnalyzer for DockerfileAnalyzer {
    fn kind(&self) -> RecipeKind {
        RecipeKind::Dockerfile
    }

    fn extract(&self, content: &str) -> Result<Recipe> {
        let mut recipe = Recipe::default();

        for instruction in parse_instructions(content)? {
            match instruction.keyword.as_str() {
                "RUN" => recipe.commands.extend(run_commands(&instruction)),
                "COPY" => {
                    if let Some(copy) = copy_instruction(&instruction.value) {
                        recipe.copies.push(copy);
                    }
                }
                _ => {}
            }
        }

        Ok(recipe)
    }
}

/// Split a build file into instructions.
pub fn parse_instructions(content: &str) -> Result<Vec<Instruction>> {
    let heredoc_re = Regex::new(r#"<<-?\s*["']?([A-Za-z_][A-Za-z0-9_]*)["']?"#)?;

    let mut instructions = Vec::new();
    let mut lines = content.lines();
    let mut pending: Vec<String> = Vec::new();

    while let Some(raw) = lines.next() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if let Some(head) = line.strip_suffix('\\') {
            pending.push(head.trim().to_string());
            continue;
        }
        pending.push(line.to_string());
        let joined = pending
            .drain(..)
            .filter(|p| !p.is_empty())
            .collect::<Vec<_>>()
            .join(" ");

        let (keyword, value) = match joined.split_once(char::is_whitespace) {
            Some((k, v)) => (k.to_ascii_uppercase(), v.trim().to_string()),
            None => (joined.to_ascii_uppercase(), String::new()),
        };

        let mut heredoc = Vec::new();
        if let Some(caps) = heredoc_re.captures(&value) {
            let marker = caps[1].to_string();
            for body in lines.by_ref() {
                if body.trim() == marker {
                    break;
                }
                heredoc.push(body.to_string());
            }
        }

        instructions.push(Instruction {
            keyword,
            value,
            heredoc,
        });
    }

    Ok(instructions)
}

fn run_commands(instruction: &Instruction) -> Vec<String> {
    let value = instruction.value.trim();

    if let Ok(exec) = serde_json::from_str::<Vec<String>>(value) {
        return split_chains(&exec.join(" "));
    }

    if !instruction.heredoc.is_empty() {
        // `RUN <<EOF` runs the body as a script.
        if value.starts_with("<<") {
            return extract_commands(&instruction.heredoc.join("\n"));
        }
        let body: Vec<&str> = instruction.heredoc.iter().map(|l| l.trim()).collect();
        return split_chains(&format!("{} {}", value, body.join(" ")));
    }

    split_chains(value)
}

fn copy_instruction(value: &str) -> Option<CopyInstruction> {
    let tokens: Vec<String> = match serde_json::from_str::<Vec<String>>(value.trim()) {
        Ok(exec) => exec,
        Err(_) => value.split_whitespace().map(str::to_string).collect(),
    };

    // Copies from other build stages never point into the repository.
    if tokens.iter().any(|t| t.starts_with("--from")) {
        return None;
    }

    let args: Vec<&str> = tokens
        .iter()
        .map(String::as_str)
        .filter(|t| !t.starts_with("--"))
        .collect();
    CopyInstruction::parse(&args.join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOCKERFILE: &str = r#"FROM ubuntu:18.04

# System packages
RUN apt-get update && \
    apt-get install -y zip htop screen python3.6-tk wget && \
    apt-get -y install git

RUN python -m pip install --upgrade pip && \
    python -m pip install --upgrade setuptools wheel

COPY requirements.txt .
RUN pip install --no-cache -r requirements.txt && pip install --no-cache -U numpy

RUN mkdir -p /usr/src/app
COPY ./notebook/nbk-requirements.txt a_new_requirements_file.txt
RUN pip install -r a_new_requirements_file.txt
COPY . /usr/src/app
WORKDIR /usr/src/app

RUN make clean && make || make clean && make
"#;

    #[test]
    fn test_extract_run_and_copy() {
        let recipe = DockerfileAnalyzer.extract(DOCKERFILE).unwrap();
        assert_eq!(
            recipe.commands,
            vec![
                "apt-get update",
                "apt-get install -y zip htop screen python3.6-tk wget",
                "apt-get -y install git",
                "python -m pip install --upgrade pip",
                "python -m pip install --upgrade setuptools wheel",
                "pip install --no-cache -r requirements.txt",
                "pip install --no-cache -U numpy",
                "mkdir -p /usr/src/app",
                "pip install -r a_new_requirements_file.txt",
                "make clean",
                "make",
                "make clean",
                "make",
            ]
        );

        let copies: Vec<String> = recipe
            .copies
            .iter()
            .map(|c| format!("{} {}", c.sources.join(" "), c.destination))
            .collect();
        assert_eq!(
            copies,
            vec![
                "requirements.txt .",
                "./notebook/nbk-requirements.txt a_new_requirements_file.txt",
                ". /usr/src/app",
            ]
        );
    }

    #[test]
    fn test_exec_form_and_copy_flags() {
        let recipe = DockerfileAnalyzer
            .extract(
                "FROM python:3.10 AS build\n\
                 COPY --chown=app:app reqs/base.txt /app/\n\
                 COPY --from=build /wheels /wheels\n\
                 RUN [\"pip\", \"install\", \"-r\", \"/app/base.txt\"]\n",
            )
            .unwrap();
        assert_eq!(recipe.commands, vec!["pip install -r /app/base.txt"]);
        assert_eq!(
            recipe.copies,
            vec![CopyInstruction {
                sources: vec!["reqs/base.txt".to_string()],
                destination: "/app/".to_string(),
            }]
        );
    }

    #[test]
    fn test_run_heredoc_script() {
        let recipe = DockerfileAnalyzer
            .extract(
                "FROM ubuntu\n\
                 RUN <<EOF\n\
                 apt-get update\n\
                 apt-get install -y curl\n\
                 EOF\n\
                 RUN pip install six\n",
            )
            .unwrap();
        assert_eq!(
            recipe.commands,
            vec!["apt-get update", "apt-get install -y curl", "pip install six"]
        );
    }

    #[test]
    fn test_heredoc_into_file_is_opaque() {
        let recipe = DockerfileAnalyzer
            .extract(
                "FROM ubuntu\n\
                 RUN cat <<EOF > /etc/pip.conf\n\
                 [global]\n\
                 EOF\n",
            )
            .unwrap();
        assert_eq!(recipe.commands, vec!["cat <<EOF > /etc/pip.conf [global]"]);
    }

    #[test]
    fn test_keywords_are_case_insensitive() {
        let instructions = parse_instructions("from ubuntu\nrun apt-get install -y vim\n").unwrap();
        assert_eq!(instructions[1].keyword, "RUN");
        assert_eq!(instructions[1].value, "apt-get install -y vim");
    }
}
