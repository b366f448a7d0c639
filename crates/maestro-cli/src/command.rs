//! Line-oriented command surface

use maestro_core::{ConductorHandle, MaestroError, Status};
use thiserror::Error;

pub const HELP: &str = "\
commands:
  start                         leave setup silence
  outro                         play the ending and stop
  style <name>                  rock, pop, edm, classical
  intensity <0-100>
  bpm <20-300>
  key <note> [maj|min|mode]     e.g. key F# dorian
  section <name>                intro, verse, chorus, build, break
  layer <name> <on|off>
  dist|chorus|delay|reverb <0-100>
  sustain <0-100>
  status
  help
  quit";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("Unknown command: {0} (try 'help')")]
    Unknown(String),
    #[error("Usage: {0}")]
    Usage(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Outro,
    Style(String),
    /// Any named parameter understood by `ConductorHandle::set_param`
    Set { param: &'static str, value: String },
    Status,
    Help,
    Quit,
}

impl Command {
    /// Parse one input line. Blank lines and `#` comments give `None`.
    pub fn parse(line: &str) -> Result<Option<Self>, CommandError> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return Ok(None);
        }
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };

        let set = |param: &'static str, usage: &'static str| {
            if rest.is_empty() {
                Err(CommandError::Usage(usage))
            } else {
                Ok(Command::Set { param, value: rest.to_string() })
            }
        };

        let command = match word.to_ascii_lowercase().as_str() {
            "start" => Command::Start,
            "outro" => Command::Outro,
            "status" => Command::Status,
            "help" | "?" => Command::Help,
            "quit" | "exit" => Command::Quit,
            "style" if rest.is_empty() => return Err(CommandError::Usage("style <name>")),
            "style" => Command::Style(rest.to_string()),
            "intensity" => set("intensity", "intensity <0-100>")?,
            "bpm" | "tempo" => set("bpm", "bpm <20-300>")?,
            "key" => set("key", "key <note> [maj|min|mode]")?,
            "section" => set("section", "section <name>")?,
            "layer" => set("layer", "layer <name> <on|off>")?,
            "dist" | "distortion" => set("dist", "dist <0-100>")?,
            "chorus" => set("chorus", "chorus <0-100>")?,
            "delay" => set("delay", "delay <0-100>")?,
            "reverb" => set("reverb", "reverb <0-100>")?,
            "sustain" => set("sustain", "sustain <0-100>")?,
            other => return Err(CommandError::Unknown(other.to_string())),
        };
        Ok(Some(command))
    }

    /// Apply to the session and describe the result for the operator
    pub fn apply(&self, handle: &ConductorHandle) -> Result<String, MaestroError> {
        match self {
            Command::Start => {
                handle.start();
                Ok("started".into())
            }
            Command::Outro => Ok(if handle.trigger_outro() {
                "outro requested".into()
            } else {
                "outro already requested".into()
            }),
            Command::Style(name) => {
                let style = handle.apply_style(name)?;
                Ok(format!("style {}", style))
            }
            Command::Set { param, value } => {
                handle.set_param(param, value)?;
                Ok(format!("{} {}", param, value))
            }
            Command::Status => Ok(describe(&handle.status())),
            Command::Help => Ok(HELP.into()),
            Command::Quit => Ok("bye".into()),
        }
    }
}

/// Human-readable summary of a status reading
pub fn describe(status: &Status) -> String {
    let s = &status.settings;
    let mut out = format!(
        "style {} | key {} | bpm {:.0} | intensity {} | section {} | sustain {} | fx d{} c{} e{} r{}",
        s.style,
        s.key.name(),
        s.tempo,
        s.intensity,
        s.section,
        s.sustain,
        s.effects.distortion,
        s.effects.chorus,
        s.effects.delay,
        s.effects.reverb,
    );
    match &status.snapshot {
        Some(snap) => out.push_str(&format!(
            "\nbeat {} | chord {} | tempo {:.1} | outro {} | gain {:.2} | layers {}",
            snap.beat,
            snap.chord,
            snap.tempo,
            snap.outro.phase.name(),
            snap.gain,
            snap.layers,
        )),
        None if !s.started => out.push_str("\nwaiting for 'start'"),
        None => {}
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &str) -> Command {
        Command::parse(line).unwrap().unwrap()
    }

    #[test]
    fn test_parse_vocabulary() {
        assert_eq!(parse("start"), Command::Start);
        assert_eq!(parse("  OUTRO "), Command::Outro);
        assert_eq!(parse("style edm"), Command::Style("edm".into()));
        assert_eq!(parse("bpm 128"), Command::Set { param: "bpm", value: "128".into() });
        assert_eq!(parse("key F# dorian"), Command::Set { param: "key", value: "F# dorian".into() });
        assert_eq!(parse("layer lead off"), Command::Set { param: "layer", value: "lead off".into() });
        assert_eq!(parse("distortion 40"), Command::Set { param: "dist", value: "40".into() });
        assert_eq!(parse("status"), Command::Status);
        assert_eq!(parse("quit"), Command::Quit);
    }

    #[test]
    fn test_blank_and_comment_lines_ignored() {
        assert_eq!(Command::parse("   "), Ok(None));
        assert_eq!(Command::parse("# warm up"), Ok(None));
    }

    #[test]
    fn test_missing_argument_and_unknown_word() {
        assert_eq!(Command::parse("reverb"), Err(CommandError::Usage("reverb <0-100>")));
        assert_eq!(Command::parse("style"), Err(CommandError::Usage("style <name>")));
        assert_eq!(Command::parse("louder 10"), Err(CommandError::Unknown("louder".into())));
    }

    #[test]
    fn test_apply_updates_session() {
        let handle = ConductorHandle::default();
        parse("intensity 250").apply(&handle).unwrap();
        assert_eq!(handle.settings().intensity, 100);
        parse("style classical").apply(&handle).unwrap();
        assert_eq!(handle.settings().style.name(), "classical");
        parse("start").apply(&handle).unwrap();
        assert!(handle.settings().started);
    }

    #[test]
    fn test_rejected_value_leaves_settings_unchanged() {
        let handle = ConductorHandle::default();
        let before = handle.settings();
        assert!(parse("key H").apply(&handle).is_err());
        assert!(parse("layer lead maybe").apply(&handle).is_err());
        assert!(parse("style polka").apply(&handle).is_err());
        assert_eq!(handle.settings(), before);
    }

    #[test]
    fn test_second_outro_reports_no_op() {
        let handle = ConductorHandle::default();
        assert_eq!(parse("outro").apply(&handle).unwrap(), "outro requested");
        assert_eq!(parse("outro").apply(&handle).unwrap(), "outro already requested");
    }

    #[test]
    fn test_status_before_start() {
        let handle = ConductorHandle::default();
        let text = parse("status").apply(&handle).unwrap();
        assert!(text.contains("style rock"));
        assert!(text.contains("waiting for 'start'"));
    }
}
