//! Dates for scripts. Always proleptic Gregorian calendar days, ISO 8601 in
//! and out, "today" taken in UTC: nothing depends on the server's locale or
//! time zone.

use chrono::{Datelike, Days, Months, NaiveDate, Utc};
use mlua::{AnyUserData, Lua, MetaMethod, Table, UserData, UserDataFields, UserDataMethods, UserDataRef};

pub const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Date(pub NaiveDate);

impl Date {
    pub fn new(year: i32, month: u32, day: u32) -> mlua::Result<Self> {
        NaiveDate::from_ymd_opt(year, month, day)
            .map(Self)
            .ok_or_else(|| mlua::Error::runtime(format!("{year}-{month}-{day} is not a valid date")))
    }

    pub fn parse(text: &str) -> mlua::Result<Self> {
        NaiveDate::parse_from_str(text, DATE_FORMAT)
            .map(Self)
            .map_err(|_| mlua::Error::runtime(format!("'{text}' is not a YYYY-MM-DD date")))
    }

    pub fn add_days(&self, days: i64) -> mlua::Result<Self> {
        let shifted = if days >= 0 {
            self.0.checked_add_days(Days::new(days as u64))
        } else {
            self.0.checked_sub_days(Days::new(days.unsigned_abs()))
        };
        shifted.map(Self).ok_or_else(out_of_range)
    }

    /// Clamps to the last day of the target month (Jan 31 + 1 month = Feb 28/29).
    pub fn add_months(&self, months: i64) -> mlua::Result<Self> {
        let span = u32::try_from(months.unsigned_abs()).map_err(|_| out_of_range())?;
        let shifted = if months >= 0 {
            self.0.checked_add_months(Months::new(span))
        } else {
            self.0.checked_sub_months(Months::new(span))
        };
        shifted.map(Self).ok_or_else(out_of_range)
    }

    pub fn end_of_month(&self) -> mlua::Result<Self> {
        NaiveDate::from_ymd_opt(self.0.year(), self.0.month(), 1)
            .and_then(|first| first.checked_add_months(Months::new(1)))
            .and_then(|next| next.pred_opt())
            .map(Self)
            .ok_or_else(out_of_range)
    }
}

fn out_of_range() -> mlua::Error {
    mlua::Error::runtime("date arithmetic out of range")
}

impl UserData for Date {
    fn add_fields<F: UserDataFields<Self>>(fields: &mut F) {
        fields.add_field_method_get("year", |_, d| Ok(d.0.year()));
        fields.add_field_method_get("month", |_, d| Ok(d.0.month()));
        fields.add_field_method_get("day", |_, d| Ok(d.0.day()));
    }

    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_method("add_days", |_, d, days: i64| d.add_days(days));
        methods.add_method("add_months", |_, d, months: i64| d.add_months(months));
        methods.add_method("add_years", |_, d, years: i64| {
            d.add_months(years.checked_mul(12).ok_or_else(out_of_range)?)
        });
        methods.add_method("end_of_month", |_, d, ()| d.end_of_month());

        methods.add_meta_method(MetaMethod::Eq, |_, d, other: AnyUserData| {
            Ok(other.borrow::<Date>().map(|o| *o == *d).unwrap_or(false))
        });
        methods.add_meta_method(MetaMethod::Lt, |_, d, other: UserDataRef<Date>| Ok(*d < *other));
        methods.add_meta_method(MetaMethod::Le, |_, d, other: UserDataRef<Date>| Ok(*d <= *other));
        // days between two dates
        methods.add_meta_method(MetaMethod::Sub, |_, d, other: UserDataRef<Date>| {
            Ok((d.0 - other.0).num_days())
        });
        methods.add_meta_method(MetaMethod::ToString, |_, d, ()| Ok(d.0.format(DATE_FORMAT).to_string()));
    }
}

/// `date.new(y, m, d)`, `date.parse("YYYY-MM-DD")`, `date.today()`.
pub(super) fn module(lua: &Lua) -> mlua::Result<Table> {
    let module = lua.create_table()?;
    module.set(
        "new",
        lua.create_function(|_, (year, month, day): (i32, u32, u32)| Date::new(year, month, day))?,
    )?;
    module.set("parse", lua.create_function(|_, text: String| Date::parse(&text))?)?;
    module.set("today", lua.create_function(|_, ()| Ok(Date(Utc::now().date_naive())))?)?;
    Ok(module)
}
