use crate::cmd::{parse_duration, NetworkArgs, SendArgs, Session};
use crate::exit::{device_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{print_sent, OutputFormat, SentOutput};

pub fn run(args: SendArgs, network: &NetworkArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let command = validate_command(&args.command)?;

    let session = Session::start(network, args.mac)?;
    let result = session.messenger(timeout).and_then(|messenger| {
        messenger
            .send(&command)
            .map_err(|err| device_error("send failed", err))?;
        Ok(messenger.state())
    });
    if let Ok(state) = &result {
        print_sent(
            &SentOutput {
                mac: &session.mac,
                command: &command,
                state: state.to_string(),
            },
            format,
        );
    }
    session.close();
    result.map(|_| SUCCESS)
}

/// An ISCP command is `!`, a unit type character, a property code and a parameter.
fn validate_command(command: &str) -> CliResult<String> {
    let command = command.trim();
    if !command.starts_with('!') || command.len() < 5 || !command.is_ascii() {
        return Err(CliError::new(
            USAGE,
            format!("not an ISCP command: {command:?} (expected e.g. !1PWR01)"),
        ));
    }
    Ok(command.to_string())
}
