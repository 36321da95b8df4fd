//! A small clock API exercising every part of the crate.
//!
//! Used by the `api-schema` binary and the integration tests. Time comes
//! from an injectable clock so output can be pinned in tests.

use std::sync::{Arc, Mutex};

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, Timelike, Utc};
use http::header::HeaderValue;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::api::Api;
use crate::argument::Argument;
use crate::context::{Anonymous, Context, HttpContextFactory};
use crate::endpoint::{CorsPolicy, Endpoint, Reply};
use crate::error::{ApiError, Failure, RaisedResponse, SchemaError};
use crate::field::Field;
use crate::model::{Assign, Attr, Model};
use crate::pipeline::Pipeline;
use crate::resource::{Resource, Returns};
use crate::types::PipelineSettings;

/// Source of "now".
pub type Clock = Arc<dyn Fn() -> NaiveDateTime + Send + Sync>;

const ISO_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// A point in time plus rendering flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DateTimeModel {
    pub timestamp: NaiveDateTime,
    #[serde(default)]
    pub include_time: bool,
    #[serde(default)]
    pub name: Option<String>,
}

impl DateTimeModel {
    pub fn new(timestamp: NaiveDateTime) -> Self {
        Self {
            timestamp,
            include_time: false,
            name: None,
        }
    }

    /// Move to another date, keeping the time of day.
    ///
    /// A day past the end of the month falls back to the first.
    pub fn update_date(&mut self, year: i32, month: u32, day: Option<u32>) -> Result<(), ApiError> {
        let day = day.unwrap_or_else(|| self.timestamp.day());
        let date = NaiveDate::from_ymd_opt(year, month, day)
            .or_else(|| NaiveDate::from_ymd_opt(year, month, 1))
            .ok_or_else(|| {
                ApiError::bad_request(format!("{}-{} is not a valid date", year, month))
            })?;
        self.timestamp = date.and_time(self.timestamp.time());
        Ok(())
    }

    pub fn iso(&self) -> String {
        self.timestamp.format(ISO_FORMAT).to_string()
    }
}

impl Model for DateTimeModel {
    fn attr(&self, name: &str) -> Attr<'_> {
        let value = match name {
            "year" => json!(self.timestamp.year()),
            "month" => json!(self.timestamp.month()),
            "day" => json!(self.timestamp.day()),
            "hours" => json!(self.timestamp.hour()),
            "minutes" => json!(self.timestamp.minute()),
            "seconds" => json!(self.timestamp.second()),
            "iso" | "timestamp" => json!(self.iso()),
            "include_time" => json!(self.include_time),
            "name" => json!(self.name),
            _ => return Attr::Missing,
        };
        Attr::Value(value)
    }

    fn set_attr(&mut self, name: &str, value: Assign) -> Result<(), ApiError> {
        let value = value.into_value();
        let number = |v: &Value| {
            v.as_i64().ok_or_else(|| {
                ApiError::unprocessable_entity(format!("Field `{}` expected an integer", name))
            })
        };
        match name {
            "name" => {
                self.name = value.as_str().map(str::to_string);
                Ok(())
            }
            "year" => {
                let year = i32::try_from(number(&value)?)
                    .map_err(|_| ApiError::unprocessable_entity("Year out of range"))?;
                self.update_date(year, self.timestamp.month(), None)
            }
            "month" => {
                let month = u32::try_from(number(&value)?)
                    .map_err(|_| ApiError::unprocessable_entity("Month out of range"))?;
                self.update_date(self.timestamp.year(), month, None)
            }
            "day" => {
                let day = u32::try_from(number(&value)?)
                    .map_err(|_| ApiError::unprocessable_entity("Day out of range"))?;
                self.update_date(self.timestamp.year(), self.timestamp.month(), Some(day))
            }
            _ => Err(ApiError::unprocessable_entity(format!(
                "Field `{}` is read-only",
                name
            ))),
        }
    }

    fn snapshot(&self) -> Option<Value> {
        serde_json::to_value(self).ok()
    }
}

/// A start and end point, `duration` apart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DateTimeRangeModel {
    pub duration_microseconds: i64,
    pub start: DateTimeModel,
    pub end: DateTimeModel,
}

impl DateTimeRangeModel {
    /// Range from `now` to `now + duration`, ordered so `start <= end`.
    pub fn new(now: NaiveDateTime, duration_microseconds: i64) -> Self {
        let then = now + Duration::microseconds(duration_microseconds);
        let (start, end) = if then < now { (then, now) } else { (now, then) };
        Self {
            duration_microseconds,
            start: DateTimeModel::new(start),
            end: DateTimeModel::new(end),
        }
    }
}

impl Model for DateTimeRangeModel {
    fn attr(&self, name: &str) -> Attr<'_> {
        match name {
            "duration_microseconds" => Attr::Value(json!(self.duration_microseconds)),
            "start" => Attr::Object(&self.start),
            "end" => Attr::Object(&self.end),
            _ => Attr::Missing,
        }
    }

    fn child_mut(&mut self, name: &str) -> Option<&mut dyn Model> {
        match name {
            "start" => Some(&mut self.start),
            "end" => Some(&mut self.end),
            _ => None,
        }
    }

    fn snapshot(&self) -> Option<Value> {
        serde_json::to_value(self).ok()
    }
}

/// The `DateTime` resource.
///
/// Time-of-day fields and `name` are added after rendering when the model
/// asks for them.
pub fn date_time_resource() -> Result<Arc<Resource>, SchemaError> {
    Resource::builder("DateTime", "A simple datetime resource")
        .field("year", Field::integer("The year of the returned DateTime"))
        .field("month", Field::integer("A month, between 1 and 12"))
        .field("day", Field::integer("The date of the month"))
        .field("hours", Field::integer("The hours time, between 0 and 23"))
        .field("minutes", Field::integer("The minutes, between 0 and 59"))
        .field("seconds", Field::integer("The seconds, between 0 and 59"))
        .field("iso", Field::string("The DateTime's ISO representation"))
        .field(
            "eurodate",
            Field::string("The date in DD.MM.YYYY format").compute(|model| {
                let part = |name| model.attr(name).into_value().as_i64().unwrap_or(0);
                json!(format!("{:02}.{:02}.{:04}", part("day"), part("month"), part("year")))
            }),
        )
        .field(
            "name",
            Field::string("Your DateTime's name").details(
                "This value will be `null` on most DateTimes. It's only set when the \
                 DateTime is created with `parse_time` and a `name` is passed in.",
            ),
        )
        .default_fields(&["year", "month", "day", "iso"])
        .underlying_model::<DateTimeModel>()
        .post_render(|model, _context, output| {
            if model.attr("include_time").into_value() == Value::Bool(true) {
                for name in ["hours", "minutes", "seconds"] {
                    output.insert(name.to_string(), model.attr(name).into_value());
                }
            }
            let name = model.attr("name").into_value();
            if !name.is_null() {
                output.insert("name".to_string(), name);
            }
        })
        .build()
}

/// The `DateTimeRange` resource, nesting two `DateTime`s.
pub fn date_time_range_resource(date_time: &Arc<Resource>) -> Result<Arc<Resource>, SchemaError> {
    let all: Vec<String> = date_time.fields().names().map(str::to_string).collect();
    Resource::builder("DateTimeRange", "A time range with nested start and end")
        .field(
            "duration_microseconds",
            Field::integer("The range's duration in microseconds."),
        )
        .field("start", Field::resource("The starting datetime of the range.", date_time))
        .field(
            "end",
            Field::resource("The ending datetime of the range.", date_time).subfields(&all),
        )
        .underlying_model::<DateTimeRangeModel>()
        .build()
}

/// In-memory document behind the `resource_*` endpoints.
#[derive(Debug, Clone)]
pub struct Store(Arc<Mutex<Map<String, Value>>>);

impl Default for Store {
    fn default() -> Self {
        Self(Arc::new(Mutex::new(Self::base())))
    }
}

impl Store {
    fn base() -> Map<String, Value> {
        let mut base = Map::new();
        base.insert("key".to_string(), json!("value"));
        base
    }

    /// Run `f` on the document and return a copy of the result.
    pub fn with<F>(&self, f: F) -> Result<Value, Failure>
    where
        F: FnOnce(&mut Map<String, Value>) -> Result<(), Failure>,
    {
        let mut data = self
            .0
            .lock()
            .map_err(|_| Failure::unclassified("resource store lock poisoned"))?;
        f(&mut data)?;
        Ok(Value::Object(data.clone()))
    }
}

/// The demo API using the system clock.
pub fn api() -> Result<Api, SchemaError> {
    api_with_clock(Arc::new(|| Utc::now().naive_utc()), Store::default())
}

pub fn api_with_clock(clock: Clock, store: Store) -> Result<Api, SchemaError> {
    let date_time = date_time_resource()?;
    let range = date_time_range_resource(&date_time)?;
    let app_resource = Resource::debug("AppResource", "app resource.");
    let all_fields: Vec<String> = date_time.fields().names().map(str::to_string).collect();

    let now = clock.clone();
    let current_time = Endpoint::get("current_time", "/time/current")
        .description("Get the current time.")
        .returns(
            Returns::one(
                "The DateTime representation of the current time on the server.",
                &date_time,
            )
            .fields(&all_fields),
        )
        .cors(CorsPolicy::AllowAll)
        .after_response(|_, response| {
            response
                .headers
                .insert("after-response", HeaderValue::from_static("OK"));
            Ok(())
        })
        .handler(move |_| Ok(Reply::keyed("time", DateTimeModel::new(now()))))
        .build()?;

    let now = clock.clone();
    let parse_time = Endpoint::post("parse_time", "/time/parse")
        .description("Build a DateTime from the passed in parameters.")
        .cache_control("max-age=3")
        .returns(Returns::one(
            "The DateTime corresponding to the timing information sent in by the requester.",
            &date_time,
        ))
        .argument(
            "year",
            Argument::integer("Set the year of the returned datetime").default(2015),
        )
        .argument(
            "month",
            Argument::integer("Set the month of the returned datetime")
                .required()
                .range(1.0, 12.0),
        )
        .argument("day", Argument::integer("Set the day of the returned datetime"))
        .argument(
            "name",
            Argument::string("The name for your datetime")
                .details(
                    "You can give your time a name, which will be returned back to you in \
                     the response, as the field `name`.",
                )
                .min_length(3)
                .max_length(20),
        )
        .argument(
            "include_time",
            Argument::boolean("Include the time in the output?").default(false),
        )
        .handler(move |context| handle_parse_time(context, now()))
        .build()?;

    let now = clock;
    let time_range = Endpoint::get("time_range", "/time/range")
        .description("Start and end times based on the passed in duration.")
        .returns(Returns::one(
            "Information about the range, with its start and end datetimes.",
            &range,
        ))
        .argument(
            "duration",
            Argument::integer("The duration in milliseconds to be used.").required(),
        )
        .handler(move |context| {
            let millis = context.arg_i64("duration").unwrap_or(0);
            let micros = millis
                .checked_mul(1000)
                .ok_or_else(|| ApiError::bad_request("Duration out of range"))?;
            Ok(Reply::keyed("range", DateTimeRangeModel::new(now(), micros)))
        })
        .build()?;

    let debug_returns = || Returns::one("app resource.", &app_resource);

    let data = store.clone();
    let resource_get = Endpoint::get("resource_get", "/resource")
        .description("Returns the resource as it exists in memory.")
        .returns(debug_returns())
        .handler(move |_| Ok(Reply::one(data.with(|_| Ok(()))?)))
        .build()?;

    let arg_test = Endpoint::get("arg_test", "/arg_test/<arg_a>/<arg_b>")
        .description("Returns the arguments as provided from the URI.")
        .returns(debug_returns())
        .handler(|context| {
            let route_arg = |name: &str| {
                context
                    .route_args
                    .get(name)
                    .cloned()
                    .unwrap_or_else(|| "no".to_string())
            };
            Ok(Reply::one(json!({
                "arg_a": route_arg("arg_a"),
                "arg_b": route_arg("arg_b"),
            })))
        })
        .build()?;

    let data = store.clone();
    let resource_reset = Endpoint::post("resource_reset", "/resource/reset")
        .description("Resets the resource to its initial state.")
        .returns(debug_returns())
        .handler(move |_| {
            let reset = data.with(|doc| {
                *doc = Store::base();
                Ok(())
            })?;
            Ok(Reply::one(reset))
        })
        .build()?;

    let data = store.clone();
    let resource_patch = Endpoint::patch("resource_patch", "/resource")
        .description("Patches the in-memory resource.")
        .returns(debug_returns())
        .patch_handler(&app_resource, move |_, patch| {
            let patched = data.with(|doc| patch.apply_to_dict(doc).map_err(Failure::from))?;
            Ok(Reply::one(patched))
        })
        .build()?;

    let data = store;
    let resource_put = Endpoint::put("resource_put", "/resource")
        .description("Replaces the in-memory resource.")
        .returns(debug_returns())
        .patch_handler(&app_resource, move |_, patch| {
            let replaced = data.with(|doc| {
                let mut fresh = Map::new();
                patch.apply_to_dict(&mut fresh)?;
                *doc = fresh;
                Ok(())
            })?;
            Ok(Reply::one(replaced))
        })
        .build()?;

    let resource_blank = Endpoint::post("resource_blank", "/blank")
        .description("Carries out some action, then returns nothing on success.")
        .cors(CorsPolicy::AllowAll)
        .handler(|_| Ok(Reply::empty()))
        .build()?;

    let moved = Endpoint::get("moved", "/moved")
        .description("Redirects to the current time.")
        .handler(|_| Err(RaisedResponse::redirect("/time/current")?.into()))
        .build()?;

    Api::builder()
        .resource(date_time)
        .resource(range)
        .endpoint(current_time)
        .endpoint(parse_time)
        .endpoint(time_range)
        .endpoint(resource_get)
        .endpoint(arg_test)
        .endpoint(resource_reset)
        .endpoint(resource_patch)
        .endpoint(resource_put)
        .endpoint(resource_blank)
        .endpoint(moved)
        .build()
}

fn handle_parse_time(context: &mut Context, now: NaiveDateTime) -> Result<Reply, Failure> {
    let mut time = DateTimeModel::new(now);
    let year = context
        .arg_i64("year")
        .and_then(|y| i32::try_from(y).ok())
        .ok_or_else(|| ApiError::bad_request("Year out of range"))?;
    let month = context
        .arg_i64("month")
        .and_then(|m| u32::try_from(m).ok())
        .ok_or_else(|| ApiError::bad_request("Month out of range"))?;
    let day = match context.arg_i64("day") {
        Some(day) => Some(u32::try_from(day).map_err(|_| ApiError::bad_request("Day out of range"))?),
        None => None,
    };
    time.update_date(year, month, day)?;
    time.include_time = context.arg_bool("include_time").unwrap_or(false);
    time.name = context.arg_str("name").map(str::to_string);
    Ok(Reply::keyed("time", time))
}

/// Pipeline for `http::Request<String>` with no authentication.
pub fn pipeline(settings: PipelineSettings) -> Result<Pipeline<http::Request<String>>, SchemaError> {
    Pipeline::builder()
        .context_factory(HttpContextFactory)
        .authenticator(Anonymous)
        .settings(settings)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S").unwrap()
    }

    #[test]
    fn update_date_keeps_time_and_clamps_day() {
        let mut time = DateTimeModel::new(at("2015-01-31T10:20:30"));
        time.update_date(2015, 2, None).unwrap();
        assert_eq!(time.iso(), "2015-02-01T10:20:30");
        time.update_date(2016, 2, Some(29)).unwrap();
        assert_eq!(time.iso(), "2016-02-29T10:20:30");
        assert!(time.update_date(2016, 13, None).is_err());
    }

    #[test]
    fn range_is_ordered() {
        let now = at("2020-01-01T00:00:00");
        let range = DateTimeRangeModel::new(now, -1_000_000);
        assert_eq!(range.start.iso(), "2019-12-31T23:59:59");
        assert_eq!(range.end.iso(), "2020-01-01T00:00:00");
    }

    #[test]
    fn demo_api_builds() {
        let api = api().unwrap();
        assert_eq!(api.endpoints().count(), 10);
        assert!(api.resource("DateTime").is_some());
        assert!(api.resource("AppResource").is_some());
    }

    #[test]
    fn model_setters_update_the_date() {
        let mut time = DateTimeModel::new(at("2015-03-04T05:06:07"));
        time.set_attr("year", Assign::Value(json!(2001))).unwrap();
        time.set_attr("name", Assign::Value(json!("party"))).unwrap();
        assert_eq!(time.iso(), "2001-03-04T05:06:07");
        assert_eq!(time.name.as_deref(), Some("party"));
        assert!(time.set_attr("iso", Assign::Value(json!("x"))).is_err());
    }
}
