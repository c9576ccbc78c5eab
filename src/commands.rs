//! Slash-command parsing for the imperative API.
//!
//! Commands arrive as free text (`/vrm-motion character=Alice loop=true
//! wave`). Key=value tokens may appear anywhere; the remaining tokens join
//! into the positional argument. Motion arguments that match no known file
//! or group are fuzzy-resolved by the caller.

/// A parsed imperative command
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Expression {
        character: Option<String>,
        expression: String,
    },
    Motion {
        character: Option<String>,
        motion: String,
        looped: bool,
        random: bool,
    },
    Light {
        color: String,
        intensity: u32,
    },
    Model {
        character: Option<String>,
        model: String,
    },
}

/// Parse one slash command. Returns a user-facing message on failure.
pub fn parse(input: &str) -> Result<Command, String> {
    let trimmed = input.trim();
    let without_slash = trimmed.strip_prefix('/').unwrap_or(trimmed);
    let mut tokens = without_slash.split_whitespace();

    let name = tokens.next().ok_or_else(|| "Empty command".to_string())?;

    let mut character = None;
    let mut looped = false;
    let mut random = true;
    let mut positional: Vec<&str> = Vec::new();

    for token in tokens {
        match token.split_once('=') {
            Some(("character", value)) | Some(("name", value)) => {
                character = Some(value.to_string());
            }
            Some(("loop", value)) => looped = value == "true",
            Some(("random", value)) => random = value != "false",
            _ => positional.push(token),
        }
    }
    let argument = positional.join(" ");

    match name {
        "vrm-expression" => {
            if argument.is_empty() {
                return Err("Usage: /vrm-expression [character=NAME] <expression>".to_string());
            }
            Ok(Command::Expression {
                character,
                expression: argument,
            })
        }
        "vrm-motion" => {
            if argument.is_empty() {
                return Err(
                    "Usage: /vrm-motion [character=NAME] [loop=true] [random=false] <motion>"
                        .to_string(),
                );
            }
            Ok(Command::Motion {
                character,
                motion: argument,
                looped,
                random,
            })
        }
        "vrm-light" => {
            let mut parts = argument.split_whitespace();
            let color = parts
                .next()
                .ok_or_else(|| "Usage: /vrm-light <color> <intensity>".to_string())?;
            let intensity = parts
                .next()
                .unwrap_or("100")
                .parse::<u32>()
                .map_err(|_| "Intensity must be a number 0-100".to_string())?;
            Ok(Command::Light {
                color: color.to_string(),
                intensity,
            })
        }
        "vrm-model" => {
            if argument.is_empty() {
                return Err("Usage: /vrm-model [character=NAME] <model file>".to_string());
            }
            Ok(Command::Model {
                character,
                model: argument,
            })
        }
        other => Err(format!("Unknown command: /{}", other)),
    }
}
