use {
    super::error::PipelineError,
    serde::{Deserialize, Serialize},
    std::fmt,
};

/// Amount in the currency's minor units (cents for USD, whole yen for JPY).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MoneyAmount(u64);

impl MoneyAmount {
    pub const ZERO: MoneyAmount = MoneyAmount(0);

    pub fn new(minor_units: u64) -> Self {
        Self(minor_units)
    }

    pub fn minor_units(&self) -> u64 {
        self.0
    }

    /// `self * bps / 10_000`, rounded down. Never overflows: the product is
    /// computed in `u128` and the result is at most `self` for `bps <= 10_000`.
    pub fn apply_rate_bps(self, bps: u32) -> Option<MoneyAmount> {
        let scaled = u128::from(self.0) * u128::from(bps) / 10_000;
        u64::try_from(scaled).ok().map(MoneyAmount)
    }

    /// Parses a provider decimal such as `"19.95"` into minor units without
    /// going through floating point. More fractional digits than the
    /// currency allows is an error, fewer are zero-padded.
    pub fn parse_decimal(raw: &str, minor_digits: u32) -> Result<Self, PipelineError> {
        let raw = raw.trim();
        let invalid = || PipelineError::Validation(format!("invalid amount: {raw:?}"));

        let (whole, frac) = match raw.split_once('.') {
            Some((w, f)) => (w, f),
            None => (raw, ""),
        };
        if whole.is_empty() || !whole.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        if !frac.bytes().all(|b| b.is_ascii_digit()) || frac.len() > minor_digits as usize {
            return Err(invalid());
        }

        let scale = 10u64.pow(minor_digits);
        let whole: u64 = whole.parse().map_err(|_| invalid())?;
        let frac_value: u64 = if frac.is_empty() {
            0
        } else {
            let padded = format!("{frac:0<width$}", width = minor_digits as usize);
            padded.parse().map_err(|_| invalid())?
        };

        whole
            .checked_mul(scale)
            .and_then(|w| w.checked_add(frac_value))
            .map(MoneyAmount)
            .ok_or_else(invalid)
    }
}

impl fmt::Display for MoneyAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Currency {
    Usd,
    Eur,
    Gbp,
    Cad,
    Aud,
    Jpy,
}

impl Currency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Usd => "usd",
            Self::Eur => "eur",
            Self::Gbp => "gbp",
            Self::Cad => "cad",
            Self::Aud => "aud",
            Self::Jpy => "jpy",
        }
    }

    pub fn minor_digits(&self) -> u32 {
        match self {
            Self::Jpy => 0,
            _ => 2,
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for Currency {
    type Error = PipelineError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s.trim().to_ascii_lowercase().as_str() {
            "usd" => Ok(Self::Usd),
            "eur" => Ok(Self::Eur),
            "gbp" => Ok(Self::Gbp),
            "cad" => Ok(Self::Cad),
            "aud" => Ok(Self::Aud),
            "jpy" => Ok(Self::Jpy),
            other => Err(PipelineError::Validation(format!(
                "unknown currency: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money {
    amount: MoneyAmount,
    currency: Currency,
}

impl Money {
    pub fn new(amount: MoneyAmount, currency: Currency) -> Self {
        Self { amount, currency }
    }

    pub fn zero(currency: Currency) -> Self {
        Self::new(MoneyAmount::ZERO, currency)
    }

    pub fn amount(&self) -> MoneyAmount {
        self.amount
    }

    pub fn currency(&self) -> Currency {
        self.currency
    }
}
