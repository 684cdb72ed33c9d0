pub mod blob;
pub mod canonical;
pub mod delays;
pub mod gtfs;
pub mod pipeline;
pub mod snapshot;
pub mod sql;
pub mod time;
pub mod timetable;

pub mod gtfs_rt {
    include!(concat!(env!("OUT_DIR"), "/transit_realtime.rs"));
}
