// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use core::fmt::{Debug, Formatter};
use std::cmp::{Ord, Ordering};
use std::ops::{AddAssign, Div, MulAssign, SubAssign};
use std::rc::Rc;
use std::str::FromStr;

use anyhow::{bail, Result};
use dashu_float;

use serde::ser::Serializer;
use serde::Serialize;

type BigFloat = dashu_float::DBig;
const PRECISION: usize = 100;

#[derive(Clone, Debug, PartialEq)]
pub struct BigDecimal {
    d: BigFloat,
}

impl From<BigFloat> for BigDecimal {
    fn from(value: BigFloat) -> Self {
        BigDecimal { d: value }
    }
}

impl BigDecimal {
    fn is_integer(&self) -> bool {
        self.d.floor() == self.d
    }
}

/// Arbitrary precision decimal number.
///
/// All numeric values flowing through the evaluator use this representation;
/// documents read from storage never lose precision on the way in or out.
#[derive(Clone)]
pub enum Number {
    Big(Rc<BigDecimal>),
}

use Number::*;

impl Debug for Number {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        match self {
            Big(b) => b.d.fmt(f),
        }
    }
}

impl Serialize for Number {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Big(b) => {
                if let Some(n) = self.as_u64() {
                    n.serialize(serializer)
                } else if let Some(n) = self.as_i64() {
                    n.serialize(serializer)
                } else {
                    if let Some(f) = self.as_f64() {
                        if b.d.digits() <= 15 {
                            return f.serialize(serializer);
                        }
                    }
                    let s = b.d.to_string();
                    let v = serde_json::Number::from_str(&s)
                        .map_err(|_| serde::ser::Error::custom("could not serialize big number"))?;
                    v.serialize(serializer)
                }
            }
        }
    }
}

impl From<BigFloat> for Number {
    fn from(n: BigFloat) -> Self {
        Self::Big(Rc::new(BigDecimal::from(
            n.with_precision(PRECISION).value(),
        )))
    }
}

impl From<u64> for Number {
    fn from(n: u64) -> Self {
        BigFloat::from(n).into()
    }
}

impl From<i64> for Number {
    fn from(n: i64) -> Self {
        BigFloat::from(n).into()
    }
}

impl From<usize> for Number {
    fn from(n: usize) -> Self {
        BigFloat::from(n).into()
    }
}

impl From<i128> for Number {
    fn from(n: i128) -> Self {
        BigFloat::from(n).into()
    }
}

impl From<f64> for Number {
    fn from(n: f64) -> Self {
        // Reading from float is not precise. Serialize to string and read back.
        match Self::from_str(&format!("{n}")) {
            Ok(v) => v,
            _ => BigFloat::ZERO.into(),
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct ParseNumberError;

impl FromStr for Number {
    type Err = ParseNumberError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(v) = BigFloat::from_str(s) {
            return Ok(v.into());
        }
        Ok(f64::from_str(s).map_err(|_| ParseNumberError)?.into())
    }
}

impl Eq for Number {}

impl PartialEq for Number {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Big(a), Big(b)) => a.d == b.d,
        }
    }
}

impl Ord for Number {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Big(a), Big(b)) => a.d.cmp(&b.d),
        }
    }
}

impl PartialOrd for Number {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// Integers that survive an f64 round trip exactly.
const EXACT_INT_BOUND: f64 = 9007199254740992.0;

impl Number {
    pub fn as_u64(&self) -> Option<u64> {
        match self.ensure_integer() {
            Some(n) if n >= 0 => Some(n as u64),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        self.ensure_integer().map(|n| n as i64)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Big(b) => Some(b.d.to_binary().value().to_f64().value()),
        }
    }

    pub fn is_integer(&self) -> bool {
        match self {
            Big(b) => b.is_integer(),
        }
    }

    fn ensure_integer(&self) -> Option<i128> {
        if !self.is_integer() {
            return None;
        }
        let f = self.as_f64()?;
        if f.abs() <= EXACT_INT_BOUND {
            Some(f as i128)
        } else {
            None
        }
    }

    pub fn add_assign(&mut self, rhs: &Self) -> Result<()> {
        match (self, rhs) {
            (Big(ref mut a), Big(b)) => {
                Rc::make_mut(a).d.add_assign(&b.d);
            }
        }
        Ok(())
    }

    pub fn add(&self, rhs: &Self) -> Result<Number> {
        let mut c = self.clone();
        c.add_assign(rhs)?;
        Ok(c)
    }

    pub fn sub(&self, rhs: &Self) -> Result<Number> {
        let mut c = self.clone();
        match (&mut c, rhs) {
            (Big(ref mut a), Big(b)) => {
                Rc::make_mut(a).d.sub_assign(&b.d);
            }
        }
        Ok(c)
    }

    pub fn mul(&self, rhs: &Self) -> Result<Number> {
        let mut c = self.clone();
        match (&mut c, rhs) {
            (Big(ref mut a), Big(b)) => {
                Rc::make_mut(a).d.mul_assign(&b.d);
            }
        }
        Ok(c)
    }

    pub fn divide(&self, rhs: &Self) -> Result<Number> {
        match (self, rhs) {
            (Big(_), Big(b)) if b.d == BigFloat::ZERO => bail!("divide by zero"),
            (Big(a), Big(b)) => Ok(a.d.clone().div(&b.d).into()),
        }
    }

    pub fn abs(&self) -> Number {
        use dashu_base::Abs;
        match self {
            Big(b) => b.d.clone().abs().into(),
        }
    }

    pub fn floor(&self) -> Number {
        match self {
            Big(b) => b.d.floor().into(),
        }
    }

    pub fn ceil(&self) -> Number {
        match self {
            Big(b) => b.d.ceil().into(),
        }
    }

    pub fn round(&self) -> Number {
        match self {
            Big(b) => b.d.round().into(),
        }
    }

    /// Render the integer part in the given base. Supported bases are 2, 8,
    /// 10 and 16; anything else yields `None`, as does a value outside the
    /// exactly-representable range. Negative values render as sign and
    /// magnitude, never as a two's-complement bit pattern.
    pub fn format_in_base(&self, base: u64) -> Option<String> {
        let n = self.floor().ensure_integer()?;
        let magnitude = n.unsigned_abs();
        let digits = match base {
            2 => format!("{:b}", magnitude),
            8 => format!("{:o}", magnitude),
            10 => format!("{}", magnitude),
            16 => format!("{:x}", magnitude),
            _ => return None,
        };
        if n < 0 {
            Some(format!("-{digits}"))
        } else {
            Some(digits)
        }
    }
}
