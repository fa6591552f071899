//! Browser module runtime
//!
//! Chunks push `[names, modules, entry?]` records onto `self.__loom_register__`.
//! The runtime drains that queue, installs module factories and runs entry
//! modules. With hot reloading on it also exposes `self.__loom_hot_apply__`,
//! which swaps in new module factories for modules that accepted updates.

const RUNTIME: &str = r#"(function () {
  if (self.__loom_require__) return;
  var HOT = __HOT__;
  var modules = {};
  var cache = {};
  var hotState = {};

  function createHot(id) {
    var state = hotState[id] = { accepted: false, disposers: [] };
    return {
      accept: function () { state.accepted = true; },
      dispose: function (fn) { state.disposers.push(fn); }
    };
  }

  function require(id) {
    var cached = cache[id];
    if (cached) return cached.exports;
    var factory = modules[id];
    if (!factory) throw new Error("Cannot find module '" + id + "'");
    var module = { id: id, exports: {}, hot: HOT ? createHot(id) : undefined };
    cache[id] = module;
    factory.call(module.exports, module, module.exports, require);
    return module.exports;
  }

  require.d = function (m) {
    return m && m.__esModule ? m["default"] : m;
  };

  require.e = function (exports, getters) {
    for (var name in getters) {
      if (Object.prototype.hasOwnProperty.call(getters, name)) {
        Object.defineProperty(exports, name, { enumerable: true, get: getters[name] });
      }
    }
  };

  require.r = function (exports, m) {
    Object.keys(m).forEach(function (name) {
      if (name === "default" || Object.prototype.hasOwnProperty.call(exports, name)) return;
      Object.defineProperty(exports, name, { enumerable: true, get: function () { return m[name]; } });
    });
  };

  function register(record) {
    var chunkModules = record[1];
    for (var id in chunkModules) {
      if (Object.prototype.hasOwnProperty.call(chunkModules, id)) modules[id] = chunkModules[id];
    }
    if (record[2]) require(record[2]);
  }

  var queue = self.__loom_register__ = self.__loom_register__ || [];
  queue.forEach(register);
  queue.push = function (record) {
    Array.prototype.push.call(queue, record);
    register(record);
  };

  if (HOT) {
    self.__loom_hot_apply__ = function (updates) {
      var ids = Object.keys(updates);
      for (var i = 0; i < ids.length; i++) {
        var state = hotState[ids[i]];
        if (cache[ids[i]] && !(state && state.accepted)) return false;
      }
      ids.forEach(function (id) {
        var state = hotState[id];
        if (state) state.disposers.forEach(function (fn) { fn(); });
        delete cache[id];
        modules[id] = new Function("module", "exports", "require", updates[id]);
      });
      ids.forEach(function (id) {
        if (hotState[id]) require(id);
      });
      return true;
    };
  }

  self.__loom_require__ = require;
})();
"#;

/// Runtime source, with or without hot-reload support
pub fn runtime_source(hot: bool) -> String {
    RUNTIME.replace("__HOT__", if hot { "true" } else { "false" })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hot_flag_is_substituted() {
        assert!(runtime_source(true).contains("var HOT = true;"));
        assert!(runtime_source(false).contains("var HOT = false;"));
        assert!(!runtime_source(false).contains("__HOT__"));
    }
}
