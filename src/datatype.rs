// used for persistence
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};

// used for money amounts and prices
use bigdecimal::{BigDecimal, ToPrimitive, Zero};

// used when parsing amounts handed to us as text
use std::str::FromStr;
// used to print out readable forms of an amount
use std::fmt;
// used to overload common operations for amounts
use std::ops;

// ------------- Amount -------------
/// An exact decimal quantity of some security. Stored as text so SQLite never
/// rounds it through a float.
#[derive(Eq, PartialEq, PartialOrd, Ord, Debug, Hash, Clone, Default)]
pub struct Amount(BigDecimal);

impl Amount {
    pub fn zero() -> Self {
        Self(BigDecimal::zero())
    }
    pub fn parse(s: &str) -> Option<Self> {
        BigDecimal::from_str(s.trim()).ok().map(Self)
    }
    /// Lossy view for script arithmetic and charting.
    pub fn to_f64(&self) -> f64 {
        self.0.to_f64().unwrap_or(f64::NAN)
    }
}
impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0.normalized())
    }
}
impl FromSql for Amount {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value {
            ValueRef::Text(_) => {
                let text = value.as_str()?;
                Self::parse(text).ok_or_else(|| FromSqlError::Other(format!("not a decimal: {text}").into()))
            }
            ValueRef::Integer(i) => Ok(Self(BigDecimal::from(i))),
            _ => Err(FromSqlError::InvalidType),
        }
    }
}
impl ToSql for Amount {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.0.to_string()))
    }
}
impl ops::Add for Amount {
    type Output = Amount;
    fn add(self, other: Amount) -> Amount {
        Amount(self.0 + other.0)
    }
}
impl<'a> ops::Add<&'a Amount> for &'a Amount {
    type Output = Amount;
    fn add(self, other: &Amount) -> Amount {
        Amount(&self.0 + &other.0)
    }
}
impl<'a> ops::Sub<&'a Amount> for &'a Amount {
    type Output = Amount;
    fn sub(self, other: &Amount) -> Amount {
        Amount(&self.0 - &other.0)
    }
}
impl ops::Neg for &Amount {
    type Output = Amount;
    fn neg(self) -> Amount {
        Amount(-&self.0)
    }
}
impl std::iter::Sum for Amount {
    fn sum<I: Iterator<Item = Amount>>(iter: I) -> Amount {
        iter.fold(Amount::zero(), |total, a| total + a)
    }
}
impl From<i64> for Amount {
    fn from(i: i64) -> Self {
        Self(BigDecimal::from(i))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sums_without_float_drift() {
        let total: Amount = ["0.1", "0.2", "-0.3"].iter().map(|s| Amount::parse(s).unwrap()).sum();
        assert_eq!(total, Amount::zero());
        assert_eq!(total.to_string(), "0");
    }

    #[test]
    fn display_is_normalized() {
        assert_eq!(Amount::parse("150.50").unwrap().to_string(), "150.5");
        assert_eq!(Amount::parse(" 100 ").unwrap().to_f64(), 100.0);
        assert!(Amount::parse("ten").is_none());
    }
}
