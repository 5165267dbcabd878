//! Server-side procedures run by [`super::RedisStore`]
//!
//! Each script executes atomically on the server. All keys a script touches
//! are declared in KEYS; partition logs are passed in index order so that
//! `KEYS[i]` is partition `i - 1` (or `i - 2` when a staging key leads).

/// KEYS: partition logs. ARGV: group, start id.
/// Creates missing logs and groups; an existing group keeps its cursor.
pub(crate) const BOOTSTRAP: &str = r#"
local group = ARGV[1]
local start = ARGV[2]
local created = 0
for _, key in ipairs(KEYS) do
  local found = false
  if redis.call('EXISTS', key) == 1 then
    local groups = redis.call('XINFO', 'GROUPS', key)
    for _, info in ipairs(groups) do
      for j = 1, #info, 2 do
        if info[j] == 'name' and info[j + 1] == group then
          found = true
        end
      end
    end
  end
  if not found then
    redis.call('XGROUP', 'CREATE', key, group, start, 'MKSTREAM')
    created = created + 1
  end
end
return created
"#;

/// KEYS: partition logs. ARGV: partition (-1 = shortest), key, value, ts, expire.
/// Returns the 0-based partition index the record was appended to.
pub(crate) const SEND: &str = r#"
local idx = tonumber(ARGV[1])
if idx < 0 then
  local shortest = nil
  for i, key in ipairs(KEYS) do
    local len = redis.call('XLEN', key)
    if shortest == nil or len < shortest then
      shortest = len
      idx = i - 1
    end
  end
end
if idx >= #KEYS then
  return redis.error_reply('partition out of range')
end
redis.call('XADD', KEYS[idx + 1], '*',
  'key', ARGV[2], 'value', ARGV[3], 'ts', ARGV[4], 'expire', ARGV[5])
return idx
"#;

/// KEYS[1]: staging set, KEYS[2..]: partition logs. ARGV: now, batch, expire.
/// A staged member leaves the set only after its append succeeded.
pub(crate) const PROMOTE: &str = r#"
local staging = KEYS[1]
local count = #KEYS - 1
local now = ARGV[1]
local due = redis.call('ZRANGEBYSCORE', staging, '-inf', now, 'LIMIT', 0, tonumber(ARGV[2]))
local moved = 0
for _, raw in ipairs(due) do
  local ok, msg = pcall(cjson.decode, raw)
  if ok and type(msg) == 'table' then
    local idx = tonumber(msg['partition'])
    if idx == nil or idx < 0 or idx >= count then
      local shortest = nil
      for i = 1, count do
        local len = redis.call('XLEN', KEYS[i + 1])
        if shortest == nil or len < shortest then
          shortest = len
          idx = i - 1
        end
      end
    end
    local key = msg['key']
    if type(key) ~= 'string' then key = '' end
    local value = msg['value']
    if type(value) ~= 'string' then value = '' end
    local id = redis.pcall('XADD', KEYS[idx + 2], '*',
      'key', key, 'value', value, 'ts', now, 'expire', ARGV[3])
    if type(id) == 'string' then
      redis.call('ZREM', staging, raw)
      moved = moved + 1
    end
  end
end
return moved
"#;

/// KEYS: partition logs. ARGV: group. Skips logs that do not exist.
pub(crate) const DESTROY_GROUP: &str = r#"
local destroyed = 0
for _, key in ipairs(KEYS) do
  if redis.call('EXISTS', key) == 1 then
    destroyed = destroyed + redis.call('XGROUP', 'DESTROY', key, ARGV[1])
  end
end
return destroyed
"#;
