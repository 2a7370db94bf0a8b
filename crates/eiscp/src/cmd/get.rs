use std::time::Duration;

use crate::cmd::{parse_code, parse_duration, GetArgs, NetworkArgs, Session};
use crate::exit::{device_error, CliError, CliResult, SUCCESS, TIMEOUT};
use crate::output::{print_property, OutputFormat, PropertyOutput};

pub fn run(args: GetArgs, network: &NetworkArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let code = parse_code(&args.code)?;

    let session = Session::start(network, args.mac)?;
    let result = query(&session, &code, timeout, format);
    session.close();
    result
}

fn query(
    session: &Session,
    code: &str,
    timeout: Duration,
    format: OutputFormat,
) -> CliResult<i32> {
    let messenger = session.messenger(timeout)?;
    let value = messenger
        .property(code)
        .map_err(|err| device_error(&format!("query {code} failed"), err))?
        .ok_or_else(|| {
            CliError::new(
                TIMEOUT,
                format!("{code} unavailable: {} did not answer", session.mac),
            )
        })?;

    print_property(
        &PropertyOutput {
            mac: &session.mac,
            code,
            value: &value,
        },
        format,
    );
    Ok(SUCCESS)
}
