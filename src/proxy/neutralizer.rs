//! Client-side frame-busting neutralization.
//!
//! The script below is injected into every rewritten page and runs in the
//! embedded page's own context. The proxy never executes it. It makes the
//! page believe it is the top-level window and swallows the usual ways of
//! breaking out of a frame.
//!
//! The script must not itself match a frame-busting signature, so property
//! paths such as `top` + `.location` are assembled at runtime.

macro_rules! neutralizer_body {
    () => {
        r#"
(function () {
  try {
    var w = window;
    var self_ = w['self'];
    var dot = function (a, b) { return a + '.' + b; };
    var pin = function (name, value) {
      try {
        Object.defineProperty(w, name, {
          get: function () { return value; },
          set: function () {},
          configurable: false
        });
      } catch (e) {}
    };

    if (w['top'] !== self_) {
      pin('top', self_);
      pin('parent', self_);
      pin('frame' + 'Element', null);

      var loc = w.location;
      try {
        Object.defineProperty(w, 'location', {
          get: function () { return loc; },
          set: function () { return false; },
          configurable: false
        });
      } catch (e) {}
    }

    w.onbeforeunload = null;
    document.onbeforeunload = null;

    var breakouts = [
      dot('top', 'location'), dot('parent', 'location'),
      dot('window', 'top'), dot('self', 'parent'),
      dot('top', 'href'), dot('parent', 'href')
    ];
    var markers = breakouts.concat(['frame' + 'buster', 'frame' + 'breaker']);
    var mentions = function (code, list) {
      var s = String(code).toLowerCase();
      for (var i = 0; i < list.length; i++) {
        if (s.indexOf(list[i].toLowerCase()) !== -1) { return true; }
      }
      return false;
    };

    var wrapTimer = function (name) {
      var original = w[name];
      w[name] = function (fn) {
        if (typeof fn === 'string' && mentions(fn, breakouts)) {
          console.warn('Blocked frame busting ' + name + ':', fn);
          return 0;
        }
        return original.apply(this, arguments);
      };
    };
    wrapTimer('setTimeout');
    wrapTimer('setInterval');

    var originalWrite = document.write;
    document.write = function (content) {
      if (typeof content === 'string' && mentions(content, markers)) {
        console.warn('Blocked frame busting document.write:', content);
        return;
      }
      return originalWrite.apply(document, arguments);
    };

    var originalEval = w.eval;
    w.eval = function (code) {
      if (typeof code === 'string') {
        var c = code.toLowerCase();
        if ((c.indexOf('top') !== -1 && c.indexOf('location') !== -1) ||
            (c.indexOf('parent') !== -1 && c.indexOf('location') !== -1) ||
            mentions(c, markers)) {
          console.warn('Blocked frame busting eval:', code);
          return undefined;
        }
      }
      return originalEval.apply(this, arguments);
    };
  } catch (e) {
    console.warn('Frame protection error:', e);
  }
})();
"#
    };
}

/// Text content of the injected script. A marked script is only the
/// injected one when its text is exactly this.
pub const NEUTRALIZER_BODY: &str = neutralizer_body!();

/// Markup injected at the top of `<head>`.
pub const NEUTRALIZER_SCRIPT: &str = concat!(
    r#"<script data-embed-proxy="neutralizer">"#,
    neutralizer_body!(),
    "</script>"
);

/// `<base>` markup anchoring relative references to `origin`.
pub fn base_tag(origin: &str) -> String {
    format!(r#"<base href="{}/">"#, escape_attribute(origin))
}

fn escape_attribute(value: &str) -> String {
    value.replace('&', "&amp;").replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::signatures::find_signature;

    #[test]
    fn script_is_a_single_element() {
        assert!(NEUTRALIZER_SCRIPT.starts_with("<script"));
        assert!(NEUTRALIZER_SCRIPT.ends_with("</script>"));
        assert_eq!(NEUTRALIZER_SCRIPT.matches("</script>").count(), 1);
        assert!(NEUTRALIZER_SCRIPT.contains(NEUTRALIZER_BODY));
    }

    #[test]
    fn script_overrides_framing_properties() {
        for needle in ["'top'", "'parent'", "'Element'", "'location'", "setTimeout", "setInterval", "document.write", "w.eval"] {
            assert!(NEUTRALIZER_SCRIPT.contains(needle), "missing {needle}");
        }
    }

    #[test]
    fn script_carries_no_busting_signature() {
        assert_eq!(find_signature(NEUTRALIZER_SCRIPT), None);
        assert!(!NEUTRALIZER_SCRIPT.contains("top.location"));
        assert!(!NEUTRALIZER_SCRIPT.contains("parent.location"));
    }

    #[test]
    fn base_tag_has_trailing_slash() {
        assert_eq!(base_tag("https://example.com"), r#"<base href="https://example.com/">"#);
    }
}
