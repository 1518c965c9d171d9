//! Helper scripts sent during the handshake.
//!
//! When [`ConnectionOptions::load_extension`](crate::ConnectionOptions) is
//! set, the connection installs a small helper library before the first
//! request. Each script is a single line and ends by yielding `"done!"`,
//! which the shell prints back as confirmation.

// ============================================================================
// Constants
// ============================================================================

/// Reply expected after each helper script.
pub const DONE_REPLY: &str = "done!";

/// Welcome line printed by the shell on connect.
pub const WELCOME_LINE: &str = "Welcome to the Mozilla JavaScript Shell!";

/// Encoder installer.
///
/// Prefers the native `JSON` object and falls back to the XPCOM `nsIJSON`
/// service on engines that predate it.
const JSON_CODEC_SCRIPT: &str = concat!(
    "__jsshHelper.stringify=(typeof JSON==\"object\"&&JSON.stringify)",
    "?function(v){return JSON.stringify(v);}",
    ":function(v){return Components.classes[\"@mozilla.org/dom/json;1\"]",
    ".createInstance(Components.interfaces.nsIJSON).encode(v);};",
    "\"done!\""
);

/// Helper library template. `$SCRATCH` is replaced by the scratch container.
const HELPER_TEMPLATE: &str = concat!(
    "var __jsshHelper={envelope:function(f){var r;",
    "try{r=__jsshHelper.stringify({errored:false,value:f()});}",
    "catch(e){r=__jsshHelper.stringify({errored:true,value:{",
    "name:(e&&e.name)||\"Error\",",
    "message:(e&&e.message!==undefined)?String(e.message):String(e),",
    "stack:(e&&e.stack)||null}});}",
    "return r.length+\"\\n\"+r;}};",
    "var $SCRATCH=(typeof $SCRATCH==\"object\"&&$SCRATCH!==null)?$SCRATCH:{};",
    "\"done!\""
);

// ============================================================================
// Public Functions
// ============================================================================

/// Returns the handshake scripts in send order: helper library, then the
/// JSON codec initializer.
#[must_use]
pub fn handshake_scripts(scratch: &str) -> [String; 2] {
    [
        HELPER_TEMPLATE.replace("$SCRATCH", scratch),
        JSON_CODEC_SCRIPT.to_string(),
    ]
}

// ============================================================================
// Tests
// ============================================================================
