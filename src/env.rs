// Copyright © 2026 Pathway

use std::env;
use std::error;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error("couldn't parse the value of {0:?} environment variable as UTF-8 string")]
    NotUtf8(String),

    #[error("couldn't parse the value of {0:?} environment variable: {1}")]
    ParsingFailed(String, #[source] Box<dyn error::Error + Send + Sync>),
}

fn read_env_var(name: &str) -> Result<Option<String>, Error> {
    env::var_os(name)
        .map(|value| {
            value
                .into_string()
                .map_err(|_| Error::NotUtf8(name.to_string()))
        })
        .transpose()
}

pub fn parse_env_var<T: FromStr>(name: &str) -> Result<Option<T>, Error>
where
    T::Err: error::Error + Send + Sync + 'static,
{
    if let Some(value) = read_env_var(name)? {
        Ok(Some(value.trim().parse().map_err(|err| {
            Error::ParsingFailed(name.to_string(), Box::new(err))
        })?))
    } else {
        Ok(None)
    }
}

/// Comma separated list, blank entries are skipped.
pub fn parse_env_list(name: &str) -> Result<Option<Vec<String>>, Error> {
    Ok(read_env_var(name)?.map(|value| {
        value
            .split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(ToString::to_string)
            .collect()
    }))
}

/// Duration given as a whole number of seconds.
pub fn parse_env_seconds(name: &str) -> Result<Option<Duration>, Error> {
    Ok(parse_env_var::<u64>(name)?.map(Duration::from_secs))
}
