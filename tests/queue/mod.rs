mod delivery;
mod expiry;
mod live_redis;
mod scheduling;
