//! Conversion between the node's decimal coin amounts and integer minor units.

/// Number of fractional digits in one coin.
pub const COIN_DECIMALS: u32 = 8;

/// Minor units in one coin.
pub const COIN: u128 = 10u128.pow(COIN_DECIMALS);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AmountError {
	#[error("Expected a decimal amount, got {0}")]
	WrongType(&'static str),

	#[error("Empty amount")]
	Empty,

	#[error("Malformed amount {0:?}")]
	Malformed(String),

	#[error("Amount {0:?} has more than 8 fractional digits")]
	TooPrecise(String),

	#[error("Amount {0:?} overflows")]
	Overflow(String),
}

/// Convert a JSON amount (string, or number kept as its literal) to minor units.
pub fn value_to_minor_units(value: &serde_json::Value) -> Result<u128, AmountError> {
	match value {
		serde_json::Value::String(s) => to_minor_units(s),
		serde_json::Value::Number(n) => to_minor_units(&n.to_string()),
		serde_json::Value::Null => Err(AmountError::WrongType("null")),
		serde_json::Value::Bool(_) => Err(AmountError::WrongType("bool")),
		serde_json::Value::Array(_) => Err(AmountError::WrongType("array")),
		serde_json::Value::Object(_) => Err(AmountError::WrongType("object")),
	}
}

/// Convert a decimal coin amount such as `"12.00000001"` to minor units.
pub fn to_minor_units(amount: &str) -> Result<u128, AmountError> {
	if amount.is_empty() {
		return Err(AmountError::Empty);
	}

	let (whole, fraction) = match amount.split_once('.') {
		Some((whole, fraction)) => (whole, Some(fraction)),
		None => (amount, None),
	};

	let is_digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
	if !is_digits(whole) || fraction.is_some_and(|f| !is_digits(f)) {
		return Err(AmountError::Malformed(amount.to_string()));
	}

	let fraction = fraction.unwrap_or("");
	if fraction.len() > COIN_DECIMALS as usize {
		return Err(AmountError::TooPrecise(amount.to_string()));
	}

	let overflow = || AmountError::Overflow(amount.to_string());
	let whole: u128 = whole.parse().map_err(|_| overflow())?;
	let fraction_units: u128 = if fraction.is_empty() {
		0
	} else {
		let padded = format!("{:0<width$}", fraction, width = COIN_DECIMALS as usize);
		padded.parse().map_err(|_| overflow())?
	};

	whole
		.checked_mul(COIN)
		.and_then(|units| units.checked_add(fraction_units))
		.ok_or_else(overflow)
}

/// Render minor units as the shortest exact decimal coin amount.
pub fn from_minor_units(units: u128) -> String {
	let whole = units / COIN;
	let fraction = units % COIN;
	if fraction == 0 {
		return whole.to_string();
	}

	let fraction = format!("{:0width$}", fraction, width = COIN_DECIMALS as usize);
	format!("{}.{}", whole, fraction.trim_end_matches('0'))
}
