use eiscp_frame::message::set_command;

use crate::cmd::{parse_code, parse_duration, NetworkArgs, Session, SetArgs};
use crate::exit::{device_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{print_sent, OutputFormat, SentOutput};

pub fn run(args: SetArgs, network: &NetworkArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let code = parse_code(&args.code)?;
    let value = args.value.trim();
    if value.is_empty() {
        return Err(CliError::new(USAGE, "value must not be empty"));
    }

    let session = Session::start(network, args.mac)?;
    let result = session.messenger(timeout).and_then(|messenger| {
        messenger
            .set_property(&code, value)
            .map_err(|err| device_error(&format!("set {code} failed"), err))?;
        Ok(messenger.state())
    });
    let command = set_command(&code, value);
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
