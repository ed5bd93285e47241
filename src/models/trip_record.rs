use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde::{Serialize, Serializer};

/// Format used for timestamps in the side files.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Input column names, in the positional order of the `TripData` table.
pub const TRIP_COLUMNS: [&str; 9] = [
    "tpep_pickup_datetime",
    "tpep_dropoff_datetime",
    "passenger_count",
    "trip_distance",
    "store_and_fwd_flag",
    "PULocationID",
    "DOLocationID",
    "fare_amount",
    "tip_amount",
];

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct TripRecord {
    #[serde(rename = "tpep_pickup_datetime", serialize_with = "serialize_timestamp")]
    pub pickup_datetime: NaiveDateTime,
    #[serde(rename = "tpep_dropoff_datetime", serialize_with = "serialize_timestamp")]
    pub dropoff_datetime: NaiveDateTime,
    pub passenger_count: i32,
    pub trip_distance: Decimal,
    pub store_and_fwd_flag: String,
    #[serde(rename = "PULocationID")]
    pub pu_location_id: i32,
    #[serde(rename = "DOLocationID")]
    pub do_location_id: i32,
    pub fare_amount: Decimal,
    pub tip_amount: Decimal,
}

/// The fields that identify the same physical trip across rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NaturalKey {
    pub pickup_datetime: NaiveDateTime,
    pub dropoff_datetime: NaiveDateTime,
    pub passenger_count: i32,
}

impl TripRecord {
    pub fn natural_key(&self) -> NaturalKey {
        NaturalKey {
            pickup_datetime: self.pickup_datetime,
            dropoff_datetime: self.dropoff_datetime,
            passenger_count: self.passenger_count,
        }
    }

    pub fn has_valid_amounts(&self) -> bool {
        self.fare_amount >= Decimal::ZERO && self.tip_amount >= Decimal::ZERO
    }
}

fn serialize_timestamp<S>(value: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.collect_str(&value.format(TIMESTAMP_FORMAT))
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use std::str::FromStr;

    pub fn timestamp(value: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(value, TIMESTAMP_FORMAT).unwrap()
    }

    pub fn trip(pickup: &str, dropoff: &str, passengers: i32, fare: &str, tip: &str) -> TripRecord {
        TripRecord {
            pickup_datetime: timestamp(pickup),
            dropoff_datetime: timestamp(dropoff),
            passenger_count: passengers,
            trip_distance: Decimal::from_str("1.20").unwrap(),
            store_and_fwd_flag: "N".to_string(),
            pu_location_id: 238,
            do_location_id: 239,
            fare_amount: Decimal::from_str(fare).unwrap(),
            tip_amount: Decimal::from_str(tip).unwrap(),
        }
    }
}
