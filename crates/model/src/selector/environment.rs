use bitflags::bitflags;
use std::{fmt, str::FromStr};

bitflags! {
    /// Publication environments, stored as a bitmask in
    /// `wiser_item.published_environment`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
    pub struct Environment: u8 {
        const DEVELOPMENT = 0b0001;
        const TEST        = 0b0010;
        const ACCEPTANCE  = 0b0100;
        const LIVE        = 0b1000;
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::DEVELOPMENT),
            "test" => Ok(Environment::TEST),
            "acceptance" | "acc" => Ok(Environment::ACCEPTANCE),
            "live" | "production" | "prod" => Ok(Environment::LIVE),
            other => Err(format!("Unknown environment: {other}")),
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self
            .iter_names()
            .map(|(name, _)| name)
            .collect();
        write!(f, "{}", names.join("|").to_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_environment_names() {
        assert_eq!("Live".parse::<Environment>(), Ok(Environment::LIVE));
        assert_eq!("acc".parse::<Environment>(), Ok(Environment::ACCEPTANCE));
        assert!("staging".parse::<Environment>().is_err());
    }

    #[test]
    fn test_bits_match_wiser_mask() {
        assert_eq!(Environment::LIVE.bits(), 8);
        assert_eq!((Environment::TEST | Environment::LIVE).bits(), 10);
        assert_eq!(Environment::LIVE.to_string(), "live");
    }
}
